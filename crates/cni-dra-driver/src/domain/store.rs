//! In-memory pod resource index
//!
//! Maps a pod uid to the claims prepared for it, in the order the allocation
//! subsystem delivered them. The index is rebuilt from scratch on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::debug;

use super::traits::PodResourceStore;
use crate::infrastructure::k8s::ResourceClaim;

/// Pod resource index guarded by a single reader/writer lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    pod_resources: RwLock<HashMap<String, Vec<Arc<ResourceClaim>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pods with at least one claim.
    pub fn pod_count(&self) -> usize {
        self.pod_resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PodResourceStore for MemoryStore {
    fn add(&self, pod_uid: &str, claim: Arc<ResourceClaim>) {
        let claim_uid = claim.claim_uid();
        let mut pod_resources = self
            .pod_resources
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let claims = pod_resources.entry(pod_uid.to_string()).or_default();
        if claims.iter().any(|stored| stored.claim_uid() == claim_uid) {
            debug!(pod_uid = pod_uid, claim_uid = %claim_uid, "claim already stored");
            return;
        }
        claims.push(claim);
    }

    fn get(&self, pod_uid: &str) -> Vec<Arc<ResourceClaim>> {
        self.pod_resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pod_uid)
            .cloned()
            .unwrap_or_default()
    }

    fn delete(&self, pod_uid: &str) {
        self.pod_resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(pod_uid);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::infrastructure::k8s::ResourceClaimSpec;

    fn claim(uid: &str) -> Arc<ResourceClaim> {
        let mut claim = ResourceClaim::new(uid, ResourceClaimSpec::default());
        claim.metadata = ObjectMeta {
            name: Some(format!("claim-{uid}")),
            namespace: Some("default".to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        };
        Arc::new(claim)
    }

    fn uids(claims: &[Arc<ResourceClaim>]) -> Vec<String> {
        claims.iter().map(|c| c.claim_uid()).collect()
    }

    #[test]
    fn get_unknown_pod_is_empty() {
        let store = MemoryStore::new();
        assert!(store.get("missing").is_empty());
        assert_eq!(store.pod_count(), 0);
    }

    #[test]
    fn add_preserves_insertion_order() {
        let store = MemoryStore::new();

        store.add("pod-a", claim("c2"));
        store.add("pod-a", claim("c1"));
        store.add("pod-a", claim("c3"));

        assert_eq!(uids(&store.get("pod-a")), vec!["c2", "c1", "c3"]);
    }

    #[test]
    fn add_is_idempotent_per_claim_uid() {
        let store = MemoryStore::new();
        let first = claim("c1");

        store.add("pod-a", first.clone());
        store.add("pod-a", claim("c1"));

        let stored = store.get("pod-a");
        assert_eq!(stored.len(), 1);
        assert!(Arc::ptr_eq(&stored[0], &first));
    }

    #[test]
    fn same_claim_can_serve_several_pods() {
        let store = MemoryStore::new();
        let shared = claim("shared");

        store.add("pod-a", shared.clone());
        store.add("pod-b", shared);

        assert_eq!(uids(&store.get("pod-a")), vec!["shared"]);
        assert_eq!(uids(&store.get("pod-b")), vec!["shared"]);
        assert_eq!(store.pod_count(), 2);
    }

    #[test]
    fn delete_removes_the_whole_entry() {
        let store = MemoryStore::new();
        store.add("pod-a", claim("c1"));
        store.add("pod-a", claim("c2"));
        store.add("pod-b", claim("c3"));

        store.delete("pod-a");
        store.delete("never-added");

        assert!(store.get("pod-a").is_empty());
        assert_eq!(uids(&store.get("pod-b")), vec!["c3"]);
    }

    #[test]
    fn concurrent_adds_store_each_claim_once() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        // every worker races on the same 50 claim uids
                        store.add("pod-a", claim(&format!("c{i}")));
                        let _ = store.get("pod-a");
                        store.add(&format!("pod-{worker}"), claim(&format!("c{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert_eq!(store.get("pod-a").len(), 50);
        assert_eq!(store.get("pod-3").len(), 50);
    }
}
