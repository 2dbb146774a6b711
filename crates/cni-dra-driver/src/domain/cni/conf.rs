//! CNI network configuration lists

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use super::result::AttachResult;

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("error parsing configuration list: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("configuration list is not a JSON object")]
    NotAnObject,
    #[error("no name in configuration list")]
    MissingName,
    #[error("invalid network name {name:?}")]
    InvalidName { name: String },
    #[error("cniVersion of configuration list is not a string")]
    InvalidVersion,
    #[error("no plugins in configuration list {name:?}")]
    MissingPlugins { name: String },
    #[error("plugin {index} of configuration list {name:?} is invalid: {reason}")]
    InvalidPlugin {
        name: String,
        index: usize,
        reason: &'static str,
    },
}

/// A chain of plugins executed in order for one network
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfigList {
    pub name: String,
    pub cni_version: String,
    pub plugins: Vec<NetworkConfig>,
    /// Encoded list, used as the cache key for results
    pub bytes: Vec<u8>,
}

/// One plugin entry of a list
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Plugin binary name
    pub kind: String,
    pub raw: Map<String, Value>,
}

/// Network names and container ids: an alphanumeric first character followed by
/// alphanumerics, `_`, `.` or `-`.
pub(crate) fn is_valid_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl NetworkConfigList {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(&value)
    }

    /// Parse a list given either as a JSON object or as a string holding the document.
    pub fn from_value(value: &Value) -> Result<Self, ConfError> {
        let object = match value {
            Value::Object(object) => object,
            Value::String(document) => return Self::from_bytes(document.as_bytes()),
            _ => return Err(ConfError::NotAnObject),
        };

        let name = match object.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => return Err(ConfError::MissingName),
        };
        // the name ends up in cache file names
        if !is_valid_identifier(&name) {
            return Err(ConfError::InvalidName { name });
        }

        let cni_version = match object.get("cniVersion") {
            None => String::new(),
            Some(Value::String(version)) => version.clone(),
            Some(_) => return Err(ConfError::InvalidVersion),
        };

        let plugins = match object.get("plugins") {
            Some(Value::Array(plugins)) if !plugins.is_empty() => plugins,
            _ => return Err(ConfError::MissingPlugins { name }),
        };

        let plugins = plugins
            .iter()
            .enumerate()
            .map(|(index, plugin)| {
                let invalid = |reason| ConfError::InvalidPlugin {
                    name: name.clone(),
                    index,
                    reason,
                };
                let raw = plugin.as_object().ok_or_else(|| invalid("not an object"))?;
                let kind = match raw.get("type") {
                    Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
                    _ => return Err(invalid("missing type")),
                };
                Ok(NetworkConfig {
                    kind,
                    raw: raw.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            cni_version,
            plugins,
            bytes: serde_json::to_vec(object)?,
        })
    }

    /// Configuration handed to one plugin on stdin.
    ///
    /// `name` and `cniVersion` come from the list, `prevResult` from the previous
    /// plugin of the chain.
    pub fn plugin_stdin(
        &self,
        plugin: &NetworkConfig,
        prev_result: Option<&AttachResult>,
    ) -> Result<Vec<u8>, serde_json::Error> {
        let mut config = plugin.raw.clone();
        config.insert("name".to_string(), Value::String(self.name.clone()));
        config.insert(
            "cniVersion".to_string(),
            Value::String(self.cni_version.clone()),
        );
        match prev_result {
            Some(prev) => {
                config.insert("prevResult".to_string(), prev.as_value().clone());
            }
            None => {
                config.remove("prevResult");
            }
        }
        serde_json::to_vec(&config)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    fn macvlan_list() -> Value {
        json!({
            "cniVersion": "1.0.0",
            "name": "macvlan-net",
            "plugins": [
                {"type": "macvlan", "master": "eth0", "ipam": {"type": "host-local", "subnet": "10.10.0.0/24"}},
                {"type": "tuning", "sysctl": {"net.ipv4.conf.net1.arp_notify": "1"}}
            ]
        })
    }

    #[test]
    fn list_is_parsed() {
        let list = NetworkConfigList::from_value(&macvlan_list()).expect("should parse");

        assert_eq!(list.name, "macvlan-net");
        assert_eq!(list.cni_version, "1.0.0");
        let kinds: Vec<&str> = list.plugins.iter().map(|p| p.kind.as_str()).collect();
        assert_eq!(kinds, vec!["macvlan", "tuning"]);
        assert_eq!(list.bytes, serde_json::to_vec(&macvlan_list()).expect("encode"));
    }

    #[test]
    fn list_embedded_as_string_is_parsed() {
        let document = serde_json::to_string(&macvlan_list()).expect("encode");

        let list = NetworkConfigList::from_value(&Value::String(document)).expect("should parse");

        assert_eq!(list.plugins.len(), 2);
    }

    #[test]
    fn invalid_lists_are_rejected() {
        let cases = [
            (json!([]), "not an object"),
            (json!({"plugins": [{"type": "bridge"}]}), "missing name"),
            (json!({"name": "../etc", "plugins": [{"type": "bridge"}]}), "bad name"),
            (json!({"name": "my net", "plugins": [{"type": "bridge"}]}), "name with space"),
            (json!({"name": "a:b", "plugins": [{"type": "bridge"}]}), "name with colon"),
            (json!({"name": "-net", "plugins": [{"type": "bridge"}]}), "name with leading dash"),
            (json!({"name": "n", "cniVersion": 1, "plugins": [{"type": "bridge"}]}), "bad version"),
            (json!({"name": "n", "plugins": []}), "empty plugins"),
            (json!({"name": "n", "plugins": [{"master": "eth0"}]}), "plugin without type"),
        ];

        for (value, case) in cases {
            assert!(
                NetworkConfigList::from_value(&value).is_err(),
                "{case} should be rejected"
            );
        }
    }

    #[test]
    fn identifiers_follow_the_network_name_rules() {
        for valid in ["macvlan-net", "net_1.v2", "A", "0abc"] {
            assert!(is_valid_identifier(valid), "{valid} should be accepted");
        }
        for invalid in ["", ".", "..", "a/b", "a b", "a:b", "_net", "n\u{e9}t"] {
            assert!(!is_valid_identifier(invalid), "{invalid} should be rejected");
        }
    }

    #[test]
    fn plugin_stdin_carries_list_fields_and_prev_result() {
        let list = NetworkConfigList::from_value(&macvlan_list()).expect("should parse");
        let prev = AttachResult::from_value(json!({"cniVersion": "1.0.0", "ips": []})).expect("object");

        let first: Value =
            serde_json::from_slice(&list.plugin_stdin(&list.plugins[0], None).expect("encode"))
                .expect("json");
        let second: Value = serde_json::from_slice(
            &list.plugin_stdin(&list.plugins[1], Some(&prev)).expect("encode"),
        )
        .expect("json");

        assert_eq!(first["name"], "macvlan-net");
        assert_eq!(first["cniVersion"], "1.0.0");
        assert_eq!(first["master"], "eth0");
        assert!(first.get("prevResult").is_none());
        assert_eq!(second["type"], "tuning");
        assert_eq!(second["prevResult"], json!({"cniVersion": "1.0.0", "ips": []}));
    }
}
