//! Driver coordinator
//!
//! Owns the device catalog, the pod resource index and the CNI runtime, and answers
//! the allocation callbacks of the kubelet and the sandbox hooks of the runtime.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::NamespacedObject;
use api_types::PreparedDevice;
use async_trait::async_trait;
use thiserror::Error;
use tracing::error;
use tracing::info;

use super::cni::Runtime;
use super::discovery::DeviceCatalog;
use super::traits::DraPlugin;
use super::traits::PodResourceStore;
use super::traits::PrepareResults;
use super::traits::UnprepareResults;
use crate::infrastructure::k8s::ResourceClaim;

/// Consumer resource a claim must be reserved for to be tracked
const POD_RESOURCE: &str = "pods";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("claim {claim} not allocated")]
    ClaimNotAllocated { claim: String },
    #[error("{message}")]
    Injected { message: String },
}

pub struct Driver {
    driver_name: String,
    catalog: Arc<DeviceCatalog>,
    store: Arc<dyn PodResourceStore>,
    cni: Arc<Runtime>,
    prepare_failure: Mutex<Option<String>>,
    unprepare_failure: Mutex<Option<String>>,
}

impl Driver {
    pub fn new(
        driver_name: impl Into<String>,
        catalog: Arc<DeviceCatalog>,
        store: Arc<dyn PodResourceStore>,
        cni: Arc<Runtime>,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            catalog,
            store,
            cni,
            prepare_failure: Mutex::new(None),
            unprepare_failure: Mutex::new(None),
        }
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub(crate) fn cni(&self) -> &Runtime {
        &self.cni
    }

    /// Make every following prepare call fail with `failure`, or clear it with `None`.
    pub fn set_prepare_failure(&self, failure: Option<String>) {
        *self
            .prepare_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failure;
    }

    /// Make every following unprepare call fail with `failure`, or clear it with `None`.
    pub fn set_unprepare_failure(&self, failure: Option<String>) {
        *self
            .unprepare_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failure;
    }

    fn injected(failure: &Mutex<Option<String>>) -> Result<(), DriverError> {
        match failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(message) => Err(DriverError::Injected { message }),
            None => Ok(()),
        }
    }

    fn node_prepare_resource(
        &self,
        claim: Arc<ResourceClaim>,
    ) -> Result<Vec<PreparedDevice>, DriverError> {
        let claim_name = claim.namespaced_name();
        let Some(allocation) = claim.allocation() else {
            return Err(DriverError::ClaimNotAllocated { claim: claim_name });
        };

        let devices: Vec<PreparedDevice> = allocation
            .devices
            .results
            .iter()
            .map(|result| PreparedDevice {
                pool_name: result.pool.clone(),
                device_name: result.device.clone(),
            })
            .collect();

        for reserved in claim.reserved_for() {
            if reserved.resource != POD_RESOURCE || !reserved.api_group.is_empty() {
                info!(
                    claim = %claim_name,
                    api_group = %reserved.api_group,
                    resource = %reserved.resource,
                    name = %reserved.name,
                    "claim reference unsupported"
                );
                continue;
            }

            info!(
                claim = %claim_name,
                pod_name = %reserved.name,
                pod_uid = %reserved.uid,
                "claim reserved for pod"
            );
            self.store.add(&reserved.uid, claim.clone());
        }

        info!(claim = %claim_name, devices = ?devices, "prepared devices for claim");
        Ok(devices)
    }
}

#[async_trait]
impl DraPlugin for Driver {
    async fn prepare_resource_claims(
        &self,
        claims: Vec<ResourceClaim>,
    ) -> Result<PrepareResults, DriverError> {
        Self::injected(&self.prepare_failure)?;

        let mut results = PrepareResults::new();
        for claim in claims {
            let uid = claim.claim_uid();
            let outcome = self.node_prepare_resource(Arc::new(claim));
            if let Err(e) = &outcome {
                error!(claim_uid = %uid, error = %e, "error preparing resources for a claim");
            }
            results.insert(uid, outcome);
        }
        Ok(results)
    }

    async fn unprepare_resource_claims(
        &self,
        claims: Vec<NamespacedObject>,
    ) -> Result<UnprepareResults, DriverError> {
        Self::injected(&self.unprepare_failure)?;

        // nothing is held per claim on the node yet
        let results = claims
            .into_iter()
            .map(|claim| {
                info!(
                    claim = %format!("{}/{}", claim.namespace, claim.name),
                    claim_uid = %claim.uid,
                    "unprepared claim"
                );
                (claim.uid, Ok(()))
            })
            .collect();
        Ok(results)
    }
}
