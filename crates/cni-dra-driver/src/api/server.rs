use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::handlers::driver_resources;
use super::handlers::healthz;
use super::handlers::prepare_resource_claims;
use super::handlers::registration_status;
use super::handlers::run_pod_sandbox;
use super::handlers::stop_pod_sandbox;
use super::handlers::unprepare_resource_claims;
use super::handlers::BridgeState;
use super::ApiError;

/// HTTP server bridging the host plugin managers to the driver
pub struct ApiServer {
    state: BridgeState,
    listen_addr: String,
}

impl ApiServer {
    pub fn new(state: BridgeState, listen_addr: String) -> Self {
        Self { state, listen_addr }
    }

    pub(crate) fn routes(&self) -> impl Endpoint {
        Route::new()
            .at("/v1/dra/prepare", post(prepare_resource_claims))
            .at("/v1/dra/unprepare", post(unprepare_resource_claims))
            .at("/v1/dra/resources", get(driver_resources))
            .at("/v1/registration/status", post(registration_status))
            .at("/v1/nri/run-pod-sandbox", post(run_pod_sandbox))
            .at("/v1/nri/stop-pod-sandbox", post(stop_pod_sandbox))
            .at("/healthz", get(healthz))
            .data(self.state.clone())
            .with(Tracing)
    }

    /// Serve until `cancellation_token` is cancelled
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting plugin bridge on {}", self.listen_addr);

        let app = self.routes();
        let listener = TcpListener::bind(&self.listen_addr);

        Server::new(listener)
            .run_with_graceful_shutdown(app, cancellation_token.cancelled_owned(), None)
            .await
            .map_err(|e| {
                error!("Plugin bridge failed: {e}");
                Report::new(ApiError::ServerError {
                    message: format!("Server failed: {e}"),
                })
            })?;

        info!("Plugin bridge stopped");
        Ok(())
    }
}
