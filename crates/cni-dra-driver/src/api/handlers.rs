use std::fmt::Display;
use std::sync::Arc;

use api_types::ClaimPrepareResult;
use api_types::ClaimUnprepareResult;
use api_types::PodSandbox;
use api_types::PrepareResponse;
use api_types::RegistrationStatus;
use api_types::UnprepareRequest;
use api_types::UnprepareResponse;
use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use serde::Deserialize;
use tracing::error;

use crate::domain::discovery::DriverResources;
use crate::domain::driver::Driver;
use crate::domain::registration::HostRegistration;
use crate::domain::traits::DraPlugin;
use crate::domain::traits::SandboxHook;
use crate::infrastructure::k8s::ResourceClaim;

/// Shared state of the bridge routes
#[derive(Clone)]
pub struct BridgeState {
    pub driver: Arc<Driver>,
    pub registration: Arc<HostRegistration>,
    pub pool_name: String,
}

/// Body of a prepare call
#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    pub claims: Vec<ResourceClaim>,
}

fn internal_error(e: impl Display) -> poem::Error {
    error!("request failed: {e}");
    poem::Error::from_string(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

#[handler]
pub async fn prepare_resource_claims(
    state: Data<&BridgeState>,
    Json(request): Json<PrepareRequest>,
) -> poem::Result<Json<PrepareResponse>> {
    let results = state
        .driver
        .prepare_resource_claims(request.claims)
        .await
        .map_err(internal_error)?;

    let claims = results
        .into_iter()
        .map(|(uid, outcome)| {
            let result = match outcome {
                Ok(devices) => ClaimPrepareResult {
                    devices,
                    error: None,
                },
                Err(e) => ClaimPrepareResult {
                    devices: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            (uid, result)
        })
        .collect();

    Ok(Json(PrepareResponse { claims }))
}

#[handler]
pub async fn unprepare_resource_claims(
    state: Data<&BridgeState>,
    Json(request): Json<UnprepareRequest>,
) -> poem::Result<Json<UnprepareResponse>> {
    let results = state
        .driver
        .unprepare_resource_claims(request.claims)
        .await
        .map_err(internal_error)?;

    let claims = results
        .into_iter()
        .map(|(uid, outcome)| {
            (
                uid,
                ClaimUnprepareResult {
                    error: outcome.err().map(|e| e.to_string()),
                },
            )
        })
        .collect();

    Ok(Json(UnprepareResponse { claims }))
}

/// Catalog publication for the configured pool
#[handler]
pub async fn driver_resources(state: Data<&BridgeState>) -> Json<DriverResources> {
    Json(state.driver.catalog().driver_resources(&state.pool_name))
}

#[handler]
pub async fn registration_status(
    state: Data<&BridgeState>,
    Json(status): Json<RegistrationStatus>,
) -> StatusCode {
    state.registration.notify(status);
    StatusCode::NO_CONTENT
}

#[handler]
pub async fn run_pod_sandbox(
    state: Data<&BridgeState>,
    Json(pod): Json<PodSandbox>,
) -> poem::Result<StatusCode> {
    state
        .driver
        .run_pod_sandbox(&pod)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[handler]
pub async fn stop_pod_sandbox(
    state: Data<&BridgeState>,
    Json(pod): Json<PodSandbox>,
) -> poem::Result<StatusCode> {
    state
        .driver
        .stop_pod_sandbox(&pod)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[handler]
pub async fn healthz() -> &'static str {
    "ok"
}
