//! CNI runtime
//!
//! Attaches the networks requested by a pod's claims when its sandbox starts. Each
//! actionable claim carries an opaque [`CniConfig`] naming the interface and the plugin
//! chain to run for it.

pub mod cache;
pub mod conf;
pub mod invoke;
pub mod result;

use std::sync::Arc;

use api_types::CniConfig;
use thiserror::Error;
use tracing::debug;
use tracing::error;
use tracing::info;

use self::conf::ConfError;
use self::conf::NetworkConfigList;
use self::invoke::CniInvoker;
use self::invoke::InvokeError;
use self::invoke::RuntimeConf;
use self::invoke::RuntimeConfError;
use super::status::StatusError;
use super::traits::PodResourceStore;
use super::traits::StatusUpdater;
use crate::infrastructure::k8s::OpaqueDeviceConfiguration;
use crate::infrastructure::k8s::ResourceClaim;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to decode opaque parameters of claim {claim}: {source}")]
    DecodeConfig {
        claim: String,
        source: serde_json::Error,
    },
    #[error("invalid network configuration in claim {claim}: {source}")]
    ConfList { claim: String, source: ConfError },
    #[error("invalid runtime configuration for claim {claim}: {source}")]
    RuntimeConf {
        claim: String,
        source: RuntimeConfError,
    },
    #[error("failed to add network {network:?} of claim {claim}: {source}")]
    AddNetwork {
        claim: String,
        network: String,
        source: InvokeError,
    },
    #[error("network of claim {claim} is attached but its status was not reported: {source}")]
    ReportStatus { claim: String, source: StatusError },
}

pub struct Runtime {
    driver_name: String,
    invoker: CniInvoker,
    store: Arc<dyn PodResourceStore>,
    status_updater: Option<Arc<dyn StatusUpdater>>,
}

impl Runtime {
    pub fn new(
        driver_name: impl Into<String>,
        invoker: CniInvoker,
        store: Arc<dyn PodResourceStore>,
        status_updater: Option<Arc<dyn StatusUpdater>>,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            invoker,
            store,
            status_updater,
        }
    }

    /// Opaque configuration of the claim when this runtime should act on it.
    ///
    /// Only claims with exactly one allocated device and one configuration, both
    /// belonging to this driver, are handled.
    fn actionable_config<'a>(&self, claim: &'a ResourceClaim) -> Option<&'a OpaqueDeviceConfiguration> {
        let devices = &claim.allocation()?.devices;
        let [result] = devices.results.as_slice() else {
            return None;
        };
        let [config] = devices.config.as_slice() else {
            return None;
        };
        let opaque = config.opaque.as_ref()?;

        (result.driver == self.driver_name && opaque.driver == self.driver_name).then_some(opaque)
    }

    /// Attach the networks of every claim recorded for the pod, in order.
    ///
    /// Stops at the first failing claim; networks attached before it stay attached.
    pub async fn attach_networks(
        &self,
        pod_sandbox_id: &str,
        pod_uid: &str,
        pod_name: &str,
        pod_namespace: &str,
        pod_netns: &str,
    ) -> Result<(), AttachError> {
        let claims = self.store.get(pod_uid);
        info!(
            pod_name = pod_name,
            pod_uid = pod_uid,
            claims = claims.len(),
            "attaching networks to pod"
        );

        let base = RuntimeConf {
            container_id: pod_sandbox_id.to_string(),
            netns: pod_netns.to_string(),
            if_name: String::new(),
            args: vec![
                ("IgnoreUnknown".to_string(), "true".to_string()),
                ("K8S_POD_NAMESPACE".to_string(), pod_namespace.to_string()),
                ("K8S_POD_NAME".to_string(), pod_name.to_string()),
                (
                    "K8S_POD_INFRA_CONTAINER_ID".to_string(),
                    pod_sandbox_id.to_string(),
                ),
                ("K8S_POD_UID".to_string(), pod_uid.to_string()),
            ],
        };

        for claim in claims {
            self.handle_claim(&claim, &base).await.inspect_err(|e| {
                error!(pod_name = pod_name, pod_uid = pod_uid, error = %e, "failed to attach networks");
            })?;
        }

        Ok(())
    }

    async fn handle_claim(&self, claim: &ResourceClaim, base: &RuntimeConf) -> Result<(), AttachError> {
        let claim_name = claim.namespaced_name();
        let Some(opaque) = self.actionable_config(claim) else {
            debug!(claim = %claim_name, "claim is not handled by this driver, skipping");
            return Ok(());
        };

        let cni_config: CniConfig =
            serde_json::from_value(opaque.parameters.clone()).map_err(|source| {
                AttachError::DecodeConfig {
                    claim: claim_name.clone(),
                    source,
                }
            })?;
        let list = NetworkConfigList::from_value(&cni_config.config).map_err(|source| {
            AttachError::ConfList {
                claim: claim_name.clone(),
                source,
            }
        })?;

        let rt = RuntimeConf {
            if_name: cni_config.if_name,
            ..base.clone()
        };
        rt.validate().map_err(|source| AttachError::RuntimeConf {
            claim: claim_name.clone(),
            source,
        })?;

        info!(claim = %claim_name, network = %list.name, if_name = %rt.if_name, "attaching network");
        let result = self
            .invoker
            .add_network_list(&list, &rt)
            .await
            .map_err(|source| AttachError::AddNetwork {
                claim: claim_name.clone(),
                network: list.name.clone(),
                source,
            })?;

        if let Some(status_updater) = &self.status_updater {
            status_updater
                .update_status(claim, &result)
                .await
                .map_err(|source| AttachError::ReportStatus {
                    claim: claim_name,
                    source,
                })?;
        }

        Ok(())
    }

    /// Counterpart of [`Runtime::attach_networks`]. Networks are currently left to be
    /// cleaned up with the sandbox, so this only records the request.
    pub async fn detach_networks(
        &self,
        pod_sandbox_id: &str,
        pod_uid: &str,
        pod_name: &str,
        pod_namespace: &str,
        pod_netns: &str,
    ) {
        info!(
            pod_sandbox_id = pod_sandbox_id,
            pod_uid = pod_uid,
            pod_name = pod_name,
            pod_namespace = pod_namespace,
            pod_netns = pod_netns,
            "detach networks requested"
        );
    }
}
