//! CNI result handling
//!
//! Plugins answer `ADD` with a result in the CNI version they were configured with.
//! [`AttachResult`] keeps that document verbatim (it is chained as `prevResult` and
//! reported as raw data); [`CurrentResult`] is the normalized 1.0.0 view used to derive
//! the network identity of the pod.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Version used when a result does not declare one.
const DEFAULT_RESULT_VERSION: &str = "0.1.0";
const CURRENT_VERSION: &str = "1.0.0";
const LEGACY_VERSIONS: [&str; 2] = ["0.1.0", "0.2.0"];
const CURRENT_SHAPE_VERSIONS: [&str; 5] = ["0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"];

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("failed to decode CNI result: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("CNI result is not a JSON object")]
    NotAnObject,
    #[error("unsupported CNI result version {version:?}")]
    UnsupportedVersion { version: String },
}

/// Result of a plugin chain, exactly as the last plugin emitted it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachResult(Value);

impl AttachResult {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ResultError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ResultError> {
        if !value.is_object() {
            return Err(ResultError::NotAnObject);
        }
        Ok(Self(value))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Declared `cniVersion`, defaulting to 0.1.0 like every CNI decoder does.
    pub fn cni_version(&self) -> &str {
        self.0
            .get("cniVersion")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_RESULT_VERSION)
    }

    /// Convert to the current result shape.
    pub fn to_current(&self) -> Result<CurrentResult, ResultError> {
        let version = self.cni_version();

        let mut current = if CURRENT_SHAPE_VERSIONS.contains(&version) {
            serde_json::from_value::<CurrentResult>(self.0.clone())?
        } else if LEGACY_VERSIONS.contains(&version) {
            serde_json::from_value::<LegacyResult>(self.0.clone())?.into()
        } else {
            return Err(ResultError::UnsupportedVersion {
                version: version.to_string(),
            });
        };

        current.cni_version = CURRENT_VERSION.to_string();
        Ok(current)
    }
}

/// CNI 1.0.0 result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentResult {
    #[serde(default)]
    pub cni_version: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub dns: Dns,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Namespace path for interfaces created inside the pod, empty for host side ones
    #[serde(default)]
    pub sandbox: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IpConfig {
    /// Index into `interfaces`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    /// CIDR notation
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Route {
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// 0.1.0 / 0.2.0 result with one block per address family
#[derive(Debug, Deserialize)]
struct LegacyResult {
    #[serde(default)]
    ip4: Option<LegacyIpConfig>,
    #[serde(default)]
    ip6: Option<LegacyIpConfig>,
    #[serde(default)]
    dns: Dns,
}

#[derive(Debug, Deserialize)]
struct LegacyIpConfig {
    ip: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

impl From<LegacyResult> for CurrentResult {
    fn from(legacy: LegacyResult) -> Self {
        let mut current = CurrentResult {
            dns: legacy.dns,
            ..Default::default()
        };

        for family in [legacy.ip4, legacy.ip6].into_iter().flatten() {
            current.ips.push(IpConfig {
                interface: None,
                address: family.ip,
                gateway: family.gateway,
            });
            current.routes.extend(family.routes);
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn current_result_is_decoded() {
        let result = AttachResult::from_value(json!({
            "cniVersion": "1.0.0",
            "interfaces": [
                {"name": "cni0", "mac": "aa:aa:aa:aa:aa:aa"},
                {"name": "net1", "mac": "02:42:ac:11:00:02", "sandbox": "/var/run/netns/pod"}
            ],
            "ips": [{"interface": 1, "address": "10.10.0.5/24", "gateway": "10.10.0.1"}],
            "routes": [{"dst": "0.0.0.0/0"}],
            "dns": {"nameservers": ["10.96.0.10"]}
        }))
        .expect("object");

        let current = result.to_current().expect("should convert");

        assert_eq!(current.interfaces.len(), 2);
        assert_eq!(current.interfaces[1].sandbox, "/var/run/netns/pod");
        assert_eq!(current.ips[0].interface, Some(1));
        assert_eq!(current.routes[0].gw, None);
        assert_eq!(current.dns.nameservers, vec!["10.96.0.10"]);
    }

    #[test]
    fn version_0_4_0_ips_with_version_field_are_accepted() {
        let result = AttachResult::from_value(json!({
            "cniVersion": "0.4.0",
            "ips": [{"version": "4", "address": "192.168.1.10/24"}]
        }))
        .expect("object");

        let current = result.to_current().expect("should convert");

        assert_eq!(current.cni_version, "1.0.0");
        assert_eq!(current.ips[0].address, "192.168.1.10/24");
    }

    #[test]
    fn legacy_result_is_upgraded() {
        let result = AttachResult::from_value(json!({
            "cniVersion": "0.2.0",
            "ip4": {"ip": "10.1.0.2/16", "gateway": "10.1.0.1", "routes": [{"dst": "0.0.0.0/0"}]},
            "ip6": {"ip": "fd00::2/64"}
        }))
        .expect("object");

        let current = result.to_current().expect("should convert");

        let addresses: Vec<&str> = current.ips.iter().map(|ip| ip.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.1.0.2/16", "fd00::2/64"]);
        assert_eq!(current.ips[0].gateway.as_deref(), Some("10.1.0.1"));
        assert_eq!(current.routes.len(), 1);
        assert!(current.interfaces.is_empty());
    }

    #[test]
    fn missing_version_defaults_to_legacy() {
        let result = AttachResult::from_value(json!({"ip4": {"ip": "10.0.0.2/8"}})).expect("object");

        assert_eq!(result.cni_version(), "0.1.0");
        assert_eq!(result.to_current().expect("convert").ips.len(), 1);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let result = AttachResult::from_value(json!({"cniVersion": "9.9.9"})).expect("object");

        let err = result.to_current().expect_err("should reject");
        assert!(matches!(err, ResultError::UnsupportedVersion { version } if version == "9.9.9"));
    }

    #[test]
    fn non_object_output_is_rejected() {
        assert!(matches!(
            AttachResult::from_bytes(b"[1, 2]"),
            Err(ResultError::NotAnObject)
        ));
        assert!(matches!(
            AttachResult::from_bytes(b"not json"),
            Err(ResultError::Decode(_))
        ));
    }
}
