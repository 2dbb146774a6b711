//! On-disk cache of ADD results
//!
//! One record per `(network, container, interface)` under `<dir>/results`, in the
//! `cniCacheV1` layout other CNI runtimes use, so tooling that inspects the cache keeps
//! working. A repeated ADD with identical inputs is answered from the record.

use std::io;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use super::conf::NetworkConfigList;
use super::invoke::RuntimeConf;
use super::result::AttachResult;

const CACHE_KIND: &str = "cniCacheV1";
const RESULTS_DIR: &str = "results";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access result cache {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to encode cached result: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedResult {
    kind: String,
    #[serde(rename = "containerId")]
    container_id: String,
    /// base64 of the configuration list
    config: String,
    #[serde(rename = "ifName")]
    if_name: String,
    #[serde(rename = "networkName")]
    network_name: String,
    #[serde(rename = "netns", default, skip_serializing_if = "String::is_empty")]
    netns: String,
    #[serde(rename = "cniArgs", default, skip_serializing_if = "Vec::is_empty")]
    cni_args: Vec<[String; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, list: &NetworkConfigList, rt: &RuntimeConf) -> PathBuf {
        self.dir.join(RESULTS_DIR).join(format!(
            "{}-{}-{}",
            list.name, rt.container_id, rt.if_name
        ))
    }

    /// Result of a previous ADD with the same configuration, namespace and arguments.
    ///
    /// Unreadable or stale records count as a miss.
    pub async fn lookup(
        &self,
        list: &NetworkConfigList,
        rt: &RuntimeConf,
    ) -> Result<Option<AttachResult>, CacheError> {
        let path = self.record_path(list, rt);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let record: CachedResult = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt cache record");
                return Ok(None);
            }
        };

        let matches = record.kind == CACHE_KIND
            && record.config == STANDARD.encode(&list.bytes)
            && record.netns == rt.netns
            && record.cni_args == cni_args(rt);
        if !matches {
            debug!(path = %path.display(), "cache record does not match the request");
            return Ok(None);
        }

        match record.result.map(AttachResult::from_value) {
            Some(Ok(result)) => Ok(Some(result)),
            Some(Err(e)) => {
                warn!(path = %path.display(), error = %e, "ignoring invalid cached result");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Persist the result of a successful ADD.
    pub async fn store(
        &self,
        list: &NetworkConfigList,
        rt: &RuntimeConf,
        result: &AttachResult,
    ) -> Result<(), CacheError> {
        let path = self.record_path(list, rt);
        let record = CachedResult {
            kind: CACHE_KIND.to_string(),
            container_id: rt.container_id.clone(),
            config: STANDARD.encode(&list.bytes),
            if_name: rt.if_name.clone(),
            network_name: list.name.clone(),
            netns: rt.netns.clone(),
            cni_args: cni_args(rt),
            result: Some(result.as_value().clone()),
        };
        let data = serde_json::to_vec(&record)?;

        let results_dir = self.dir.join(RESULTS_DIR);
        tokio::fs::create_dir_all(&results_dir)
            .await
            .map_err(|source| CacheError::Io {
                path: results_dir,
                source,
            })?;

        // write then rename so readers never see a partial record
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| CacheError::Io { path, source })
    }
}

fn cni_args(rt: &RuntimeConf) -> Vec<[String; 2]> {
    rt.args
        .iter()
        .map(|(key, value)| [key.clone(), value.clone()])
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    fn list() -> NetworkConfigList {
        NetworkConfigList::from_value(&json!({
            "cniVersion": "1.0.0",
            "name": "dummy",
            "plugins": [{"type": "dummy"}]
        }))
        .expect("should parse")
    }

    fn runtime_conf() -> RuntimeConf {
        RuntimeConf {
            container_id: "sandbox-1".to_string(),
            netns: "/var/run/netns/pod".to_string(),
            if_name: "net1".to_string(),
            args: vec![("K8S_POD_NAME".to_string(), "web".to_string())],
        }
    }

    fn result() -> AttachResult {
        AttachResult::from_value(json!({"cniVersion": "1.0.0", "ips": [{"address": "10.0.0.2/24"}]}))
            .expect("object")
    }

    #[tokio::test]
    async fn stored_result_is_found_again() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path());

        assert!(cache.lookup(&list(), &runtime_conf()).await.expect("lookup").is_none());
        cache
            .store(&list(), &runtime_conf(), &result())
            .await
            .expect("store");

        let cached = cache.lookup(&list(), &runtime_conf()).await.expect("lookup");
        assert_eq!(cached, Some(result()));

        let record: Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("results/dummy-sandbox-1-net1")).expect("record"),
        )
        .expect("json");
        assert_eq!(record["kind"], "cniCacheV1");
        assert_eq!(record["cniArgs"], json!([["K8S_POD_NAME", "web"]]));
    }

    #[tokio::test]
    async fn changed_inputs_miss_the_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path());
        cache
            .store(&list(), &runtime_conf(), &result())
            .await
            .expect("store");

        let mut other_netns = runtime_conf();
        other_netns.netns = "/var/run/netns/other".to_string();
        let mut other_args = runtime_conf();
        other_args.args.push(("K8S_POD_UID".to_string(), "uid".to_string()));

        assert!(cache.lookup(&list(), &other_netns).await.expect("lookup").is_none());
        assert!(cache.lookup(&list(), &other_args).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path());
        std::fs::create_dir_all(dir.path().join("results")).expect("mkdir");
        std::fs::write(dir.path().join("results/dummy-sandbox-1-net1"), b"{garbage").expect("write");

        assert!(cache.lookup(&list(), &runtime_conf()).await.expect("lookup").is_none());
    }
}
