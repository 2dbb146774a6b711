//! Seams between the driver core and the node services hosting it

use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::NamespacedObject;
use api_types::PodSandbox;
use api_types::PreparedDevice;
use api_types::RegistrationStatus;
use async_trait::async_trait;

use super::cni::result::AttachResult;
use super::driver::DriverError;
use super::nri::NriError;
use super::status::StatusError;
use crate::infrastructure::k8s::ResourceClaim;

/// Per-claim outcome of a prepare call, keyed by claim uid
pub type PrepareResults = BTreeMap<String, Result<Vec<PreparedDevice>, DriverError>>;

/// Per-claim outcome of an unprepare call, keyed by claim uid
pub type UnprepareResults = BTreeMap<String, Result<(), DriverError>>;

/// Index from pod uid to the claims prepared for that pod
pub trait PodResourceStore: Send + Sync {
    /// Record that `claim` is used by the pod. Adding the same claim uid twice is a no-op.
    fn add(&self, pod_uid: &str, claim: Arc<ResourceClaim>);

    /// Claims recorded for the pod in insertion order, empty when none.
    fn get(&self, pod_uid: &str) -> Vec<Arc<ResourceClaim>>;

    /// Drop everything recorded for the pod.
    fn delete(&self, pod_uid: &str);
}

/// Callbacks of the dynamic resource allocation host
#[async_trait]
pub trait DraPlugin: Send + Sync {
    /// Prepare the claims the scheduler allocated on this node.
    ///
    /// A failing claim is reported in its own entry; the outer error fails the whole
    /// call.
    async fn prepare_resource_claims(
        &self,
        claims: Vec<ResourceClaim>,
    ) -> Result<PrepareResults, DriverError>;

    async fn unprepare_resource_claims(
        &self,
        claims: Vec<NamespacedObject>,
    ) -> Result<UnprepareResults, DriverError>;
}

/// Pod sandbox lifecycle hooks of the container runtime
#[async_trait]
pub trait SandboxHook: Send + Sync {
    async fn run_pod_sandbox(&self, pod: &PodSandbox) -> Result<(), NriError>;

    async fn stop_pod_sandbox(&self, pod: &PodSandbox) -> Result<(), NriError>;
}

/// Publishes the network outcome of a claim to the cluster
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    async fn update_status(
        &self,
        claim: &ResourceClaim,
        result: &AttachResult,
    ) -> Result<(), StatusError>;
}

/// Registration state as reported by the kubelet
pub trait PluginHost: Send + Sync {
    /// Latest status, `None` until the kubelet called back.
    fn registration_status(&self) -> Option<RegistrationStatus>;
}
