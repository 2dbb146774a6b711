use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use tracing::debug;

use super::types::KubernetesError;
use super::types::ResourceClaim;

/// Writes the status sub-resource of a ResourceClaim
#[async_trait]
pub trait ClaimStatusApi: Send + Sync {
    /// Replace the claim status with the one carried by `claim`.
    ///
    /// The write uses the claim's resource version, so a concurrent update makes
    /// this call fail with [`KubernetesError::StatusConflict`].
    async fn replace_claim_status(
        &self,
        claim: &ResourceClaim,
    ) -> Result<ResourceClaim, Report<KubernetesError>>;
}

#[async_trait]
impl ClaimStatusApi for Client {
    async fn replace_claim_status(
        &self,
        claim: &ResourceClaim,
    ) -> Result<ResourceClaim, Report<KubernetesError>> {
        let claim_name = claim.namespaced_name();
        let namespace = claim.namespace().unwrap_or_default();
        let api: Api<ResourceClaim> = Api::namespaced(self.clone(), &namespace);

        let data = serde_json::to_vec(claim).change_context(
            KubernetesError::StatusUpdateFailed {
                claim: claim_name.clone(),
                message: "failed to encode resource claim".to_string(),
            },
        )?;

        debug!(claim = %claim_name, "replacing resource claim status");

        match api
            .replace_status(&claim.name_any(), &PostParams::default(), data)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Err(Report::new(KubernetesError::StatusConflict { claim: claim_name })
                    .attach_printable(response.message))
            }
            Err(e) => Err(Report::new(KubernetesError::StatusUpdateFailed {
                claim: claim_name,
                message: e.to_string(),
            })),
        }
    }
}
