//! Publishes CNI results into ResourceClaim status

use async_trait::async_trait;
use error_stack::Report;
use thiserror::Error;
use tracing::info;

use super::cni::result::AttachResult;
use super::cni::result::CurrentResult;
use super::cni::result::ResultError;
use super::traits::StatusUpdater;
use crate::infrastructure::k8s::AllocatedDeviceStatus;
use crate::infrastructure::k8s::ClaimStatusApi;
use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::k8s::NetworkDeviceData;
use crate::infrastructure::k8s::ResourceClaim;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to convert CNI result: {0}")]
    Convert(#[from] ResultError),
    #[error("claim {claim} has no allocated device to report on")]
    MissingAllocation { claim: String },
    #[error("failed to update resource claim status: {0}")]
    Update(Report<KubernetesError>),
}

/// Network identity of the pod as seen in a CNI result.
///
/// All addresses are reported; name and MAC come from the last interface created
/// inside the pod sandbox.
pub fn cni_result_to_network_data(result: &CurrentResult) -> NetworkDeviceData {
    let mut data = NetworkDeviceData {
        ips: result.ips.iter().map(|ip| ip.address.clone()).collect(),
        ..Default::default()
    };

    for interface in result.interfaces.iter().filter(|i| !i.sandbox.is_empty()) {
        data.interface_name = Some(interface.name.clone());
        data.hardware_address = Some(interface.mac.clone()).filter(|mac| !mac.is_empty());
    }

    data
}

/// [`StatusUpdater`] writing to the cluster through [`ClaimStatusApi`]
pub struct CniStatusHandler<C> {
    client: C,
}

impl<C: ClaimStatusApi> CniStatusHandler<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: ClaimStatusApi> StatusUpdater for CniStatusHandler<C> {
    async fn update_status(
        &self,
        claim: &ResourceClaim,
        result: &AttachResult,
    ) -> Result<(), StatusError> {
        let claim_name = claim.namespaced_name();
        let network_data = cni_result_to_network_data(&result.to_current()?);

        let device = claim
            .allocation()
            .and_then(|allocation| allocation.devices.results.first())
            .ok_or_else(|| StatusError::MissingAllocation {
                claim: claim_name.clone(),
            })?;

        let mut updated = claim.clone();
        updated
            .status
            .get_or_insert_with(Default::default)
            .devices
            .push(AllocatedDeviceStatus {
                driver: device.driver.clone(),
                pool: device.pool.clone(),
                device: device.device.clone(),
                share_id: device.share_id.clone(),
                data: Some(result.as_value().clone()),
                network_data: Some(network_data),
                ..Default::default()
            });

        self.client
            .replace_claim_status(&updated)
            .await
            .map_err(StatusError::Update)?;

        info!(claim = %claim_name, device = %device.device, "updated resource claim status");
        Ok(())
    }
}
