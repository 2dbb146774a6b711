//! Sandbox hooks of the container runtime

use api_types::PodSandbox;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::cni::AttachError;
use super::driver::Driver;
use super::traits::SandboxHook;

#[derive(Debug, Error)]
pub enum NriError {
    #[error("error getting network namespace for pod '{pod_name}' in namespace '{namespace}'")]
    MissingNetworkNamespace { pod_name: String, namespace: String },
    #[error("error attaching networks for pod '{pod_name}' (uid: {pod_uid}) in namespace '{namespace}': {source}")]
    AttachNetworks {
        pod_name: String,
        pod_uid: String,
        namespace: String,
        source: AttachError,
    },
}

#[async_trait]
impl SandboxHook for Driver {
    async fn run_pod_sandbox(&self, pod: &PodSandbox) -> Result<(), NriError> {
        info!(pod_name = %pod.name, namespace = %pod.namespace, "run pod sandbox");

        let netns = pod
            .network_namespace()
            .ok_or_else(|| NriError::MissingNetworkNamespace {
                pod_name: pod.name.clone(),
                namespace: pod.namespace.clone(),
            })?;

        self.cni()
            .attach_networks(&pod.id, &pod.uid, &pod.name, &pod.namespace, netns)
            .await
            .map_err(|source| NriError::AttachNetworks {
                pod_name: pod.name.clone(),
                pod_uid: pod.uid.clone(),
                namespace: pod.namespace.clone(),
                source,
            })
    }

    async fn stop_pod_sandbox(&self, pod: &PodSandbox) -> Result<(), NriError> {
        info!(pod_name = %pod.name, namespace = %pod.namespace, "stop pod sandbox");

        let netns = pod.network_namespace().unwrap_or_default();
        self.cni()
            .detach_networks(&pod.id, &pod.uid, &pod.name, &pod.namespace, netns)
            .await;
        Ok(())
    }
}
