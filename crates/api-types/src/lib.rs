//! Shared API type definitions
//!
//! This crate contains the wire types exchanged between the driver and its host
//! callers: the opaque CNI parameters carried on a ResourceClaim, the pod sandbox
//! description delivered by the runtime hook, and the request/response shapes of the
//! allocation plugin contract.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Namespace type tag of the network namespace in a sandbox description.
pub const NETWORK_NAMESPACE_TYPE: &str = "network";

/// Opaque parameters of a claim configuration entry addressed to this driver.
///
/// ```json
/// { "ifName": "net1", "config": { "cniVersion": "1.0.0", "name": "vlan", "plugins": [] } }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniConfig {
    /// Interface name requested inside the pod network namespace
    #[serde(default)]
    pub if_name: String,
    /// CNI network configuration list
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Pod sandbox as described by the runtime lifecycle hook
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodSandbox {
    /// Sandbox (infra container) identifier
    pub id: String,
    pub name: String,
    pub uid: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub linux: Option<LinuxPodSandbox>,
}

impl PodSandbox {
    /// Path of the sandbox network namespace, if one was declared.
    pub fn network_namespace(&self) -> Option<&str> {
        self.linux
            .as_ref()?
            .namespaces
            .iter()
            .find(|ns| ns.kind == NETWORK_NAMESPACE_TYPE)
            .map(|ns| ns.path.as_str())
            .filter(|path| !path.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinuxPodSandbox {
    #[serde(default)]
    pub namespaces: Vec<LinuxNamespace>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinuxNamespace {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: String,
}

/// Reference to a claim being released
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NamespacedObject {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

/// A device handed back to the allocation subsystem after prepare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedDevice {
    pub pool_name: String,
    pub device_name: String,
}

/// Per-claim outcome of a prepare call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClaimPrepareResult {
    #[serde(default)]
    pub devices: Vec<PreparedDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of a prepare call, keyed by claim uid
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub claims: BTreeMap<String, ClaimPrepareResult>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnprepareRequest {
    pub claims: Vec<NamespacedObject>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClaimUnprepareResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of an unprepare call, keyed by claim uid
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnprepareResponse {
    pub claims: BTreeMap<String, ClaimUnprepareResult>,
}

/// Registration outcome reported by the plugin manager
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub plugin_registered: bool,
    #[serde(default)]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn sandbox_with_namespaces(namespaces: Vec<LinuxNamespace>) -> PodSandbox {
        PodSandbox {
            id: "sandbox-1".to_string(),
            name: "web".to_string(),
            uid: "pod-uid".to_string(),
            namespace: "default".to_string(),
            linux: Some(LinuxPodSandbox { namespaces }),
            ..Default::default()
        }
    }

    #[test]
    fn network_namespace_is_found_by_type() {
        let sandbox = sandbox_with_namespaces(vec![
            LinuxNamespace {
                kind: "ipc".to_string(),
                path: "/proc/1/ns/ipc".to_string(),
            },
            LinuxNamespace {
                kind: "network".to_string(),
                path: "/var/run/netns/cni-1234".to_string(),
            },
        ]);

        assert_eq!(sandbox.network_namespace(), Some("/var/run/netns/cni-1234"));
    }

    #[test]
    fn network_namespace_missing() {
        let sandbox = sandbox_with_namespaces(vec![LinuxNamespace {
            kind: "uts".to_string(),
            path: "/proc/1/ns/uts".to_string(),
        }]);
        assert_eq!(sandbox.network_namespace(), None);

        let no_linux = PodSandbox::default();
        assert_eq!(no_linux.network_namespace(), None);
    }

    #[test]
    fn cni_config_decodes_opaque_parameters() {
        let raw = r#"{
            "ifName": "net1",
            "config": {"cniVersion": "1.0.0", "name": "macvlan", "plugins": [{"type": "macvlan"}]}
        }"#;

        let config: CniConfig = serde_json::from_str(raw).expect("should decode");

        assert_eq!(config.if_name, "net1");
        assert_eq!(config.config["name"], "macvlan");
    }

    #[test]
    fn sandbox_decodes_runtime_payload() {
        let raw = r#"{
            "id": "abc",
            "name": "web",
            "uid": "1234",
            "namespace": "default",
            "linux": {"namespaces": [{"type": "network", "path": "/var/run/netns/x"}]}
        }"#;

        let sandbox: PodSandbox = serde_json::from_str(raw).expect("should decode");

        assert_eq!(sandbox.network_namespace(), Some("/var/run/netns/x"));
        assert!(sandbox.labels.is_empty());
    }
}
