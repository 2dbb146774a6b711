//! Plugin invocation following the CNI exec protocol
//!
//! A plugin is a binary found on the plugin search path. It gets its configuration on
//! stdin, the operation and runtime parameters in `CNI_*` environment variables, and
//! answers with a result (or an error document) on stdout.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use tracing::info;

use super::cache::CacheError;
use super::cache::ResultCache;
use super::conf::is_valid_identifier;
use super::conf::NetworkConfigList;
use super::result::AttachResult;
use super::result::ResultError;

/// Error document a failing plugin prints on stdout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniPluginError {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl fmt::Display for CniPluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.details.is_empty() {
            write!(f, "{} (code {})", self.msg, self.code)
        } else {
            write!(f, "{}; {} (code {})", self.msg, self.details, self.code)
        }
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to find plugin {plugin:?} in path {paths:?}")]
    PluginNotFound { plugin: String, paths: Vec<PathBuf> },
    #[error("failed to encode configuration for plugin {plugin:?}: {source}")]
    EncodeConfig {
        plugin: String,
        source: serde_json::Error,
    },
    #[error("failed to run plugin {plugin:?}: {source}")]
    Io { plugin: String, source: io::Error },
    #[error("plugin {plugin:?} failed: {error}")]
    Plugin {
        plugin: String,
        error: CniPluginError,
    },
    #[error("plugin {plugin:?} returned an invalid result: {source}")]
    InvalidResult { plugin: String, source: ResultError },
    #[error("network {network:?} produced no result")]
    NoResult { network: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Longest interface name the kernel accepts
const MAX_INTERFACE_NAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeConfError {
    #[error("invalid container id {container_id:?}")]
    InvalidContainerId { container_id: String },
    #[error("interface name is empty")]
    EmptyInterfaceName,
    #[error("interface name {if_name:?} is longer than {max} characters", max = MAX_INTERFACE_NAME_LEN)]
    InterfaceNameTooLong { if_name: String },
    #[error("invalid interface name {if_name:?}")]
    InvalidInterfaceName { if_name: String },
}

/// Runtime parameters of one ADD
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConf {
    pub container_id: String,
    pub netns: String,
    pub if_name: String,
    /// Passed to plugins as `CNI_ARGS`, in order
    pub args: Vec<(String, String)>,
}

impl RuntimeConf {
    /// `CNI_ARGS` value: `K=V` pairs joined by `;`.
    pub fn cni_args(&self) -> String {
        self.args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Check the container id and interface name before they reach a plugin or a
    /// cache file name.
    pub fn validate(&self) -> Result<(), RuntimeConfError> {
        if !is_valid_identifier(&self.container_id) {
            return Err(RuntimeConfError::InvalidContainerId {
                container_id: self.container_id.clone(),
            });
        }

        let if_name = &self.if_name;
        if if_name.is_empty() {
            return Err(RuntimeConfError::EmptyInterfaceName);
        }
        if if_name.len() > MAX_INTERFACE_NAME_LEN {
            return Err(RuntimeConfError::InterfaceNameTooLong {
                if_name: if_name.clone(),
            });
        }
        if if_name == "."
            || if_name == ".."
            || if_name.contains(|c: char| c == '/' || c == ':' || c.is_whitespace())
        {
            return Err(RuntimeConfError::InvalidInterfaceName {
                if_name: if_name.clone(),
            });
        }
        Ok(())
    }
}

/// Locates and runs plugin binaries
#[async_trait]
pub trait PluginExec: Send + Sync {
    /// Path of `plugin` in the first directory of `paths` that holds it.
    fn find_in_path(&self, plugin: &str, paths: &[PathBuf]) -> Result<PathBuf, InvokeError>;

    /// Run the plugin and return its stdout.
    ///
    /// A non-zero exit is mapped to [`InvokeError::Plugin`].
    async fn exec_plugin(
        &self,
        plugin_path: &Path,
        stdin: Vec<u8>,
        env: Vec<(String, String)>,
    ) -> Result<Vec<u8>, InvokeError>;
}

/// Runs plugins as child processes, optionally inside a chroot of the host filesystem
#[derive(Debug, Clone, Default)]
pub struct RawExec {
    chroot_dir: Option<PathBuf>,
}

impl RawExec {
    pub fn new(chroot_dir: Option<PathBuf>) -> Self {
        Self { chroot_dir }
    }

    /// Where `path` lives as seen from this process.
    fn host_path(&self, path: &Path) -> PathBuf {
        match &self.chroot_dir {
            Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
            None => path.to_path_buf(),
        }
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn plugin_name(plugin_path: &Path) -> String {
    plugin_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| plugin_path.display().to_string())
}

/// Error reported by a plugin that exited with `status`.
fn plugin_failure(plugin: String, stdout: &[u8], status: ExitStatus) -> InvokeError {
    let error = serde_json::from_slice::<CniPluginError>(stdout)
        .ok()
        .filter(|error| !error.msg.is_empty())
        .unwrap_or_else(|| CniPluginError {
            code: 0,
            msg: format!("plugin exited with {status}"),
            details: String::from_utf8_lossy(stdout).trim().to_string(),
        });
    InvokeError::Plugin { plugin, error }
}

#[async_trait]
impl PluginExec for RawExec {
    fn find_in_path(&self, plugin: &str, paths: &[PathBuf]) -> Result<PathBuf, InvokeError> {
        let not_found = || InvokeError::PluginNotFound {
            plugin: plugin.to_string(),
            paths: paths.to_vec(),
        };
        if plugin.is_empty() || plugin.contains('/') {
            return Err(not_found());
        }

        paths
            .iter()
            .map(|dir| dir.join(plugin))
            .find(|candidate| is_executable(&self.host_path(candidate)))
            .ok_or_else(not_found)
    }

    async fn exec_plugin(
        &self,
        plugin_path: &Path,
        stdin: Vec<u8>,
        env: Vec<(String, String)>,
    ) -> Result<Vec<u8>, InvokeError> {
        let plugin = plugin_name(plugin_path);
        let io_error = |source| InvokeError::Io {
            plugin: plugin.clone(),
            source,
        };

        let mut command = Command::new(plugin_path);
        command
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(root) = &self.chroot_dir {
            let root = CString::new(root.as_os_str().as_bytes())
                .map_err(|e| io_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
            // SAFETY: only async-signal-safe libc calls run between fork and exec
            unsafe {
                command.pre_exec(move || {
                    if libc::chroot(root.as_ptr()) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::chdir(c"/".as_ptr()) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        debug!(plugin = %plugin, path = %plugin_path.display(), "executing CNI plugin");
        let mut child = command.spawn().map_err(io_error)?;
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(&stdin).await.map_err(io_error)?;
        }
        let output = child.wait_with_output().await.map_err(io_error)?;

        if !output.status.success() {
            return Err(plugin_failure(plugin, &output.stdout, output.status));
        }
        Ok(output.stdout)
    }
}

/// Runs network configuration lists against a plugin search path
pub struct CniInvoker {
    exec: Arc<dyn PluginExec>,
    plugin_paths: Vec<PathBuf>,
    cache: ResultCache,
}

impl CniInvoker {
    pub fn new(exec: Arc<dyn PluginExec>, plugin_paths: Vec<PathBuf>, cache: ResultCache) -> Self {
        Self {
            exec,
            plugin_paths,
            cache,
        }
    }

    fn environment(&self, command: &str, rt: &RuntimeConf) -> Vec<(String, String)> {
        let plugin_path = self
            .plugin_paths
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        vec![
            ("CNI_COMMAND".to_string(), command.to_string()),
            ("CNI_CONTAINERID".to_string(), rt.container_id.clone()),
            ("CNI_NETNS".to_string(), rt.netns.clone()),
            ("CNI_IFNAME".to_string(), rt.if_name.clone()),
            ("CNI_ARGS".to_string(), rt.cni_args()),
            ("CNI_PATH".to_string(), plugin_path),
        ]
    }

    /// Run ADD through every plugin of the list, chaining each result into the next
    /// plugin as `prevResult`.
    ///
    /// Returns the result of the last plugin. A cached result for identical inputs is
    /// returned without running any plugin.
    pub async fn add_network_list(
        &self,
        list: &NetworkConfigList,
        rt: &RuntimeConf,
    ) -> Result<AttachResult, InvokeError> {
        if let Some(cached) = self.cache.lookup(list, rt).await? {
            info!(
                network = %list.name,
                container_id = %rt.container_id,
                if_name = %rt.if_name,
                "network already added, using cached result"
            );
            return Ok(cached);
        }

        let mut prev_result: Option<AttachResult> = None;
        for plugin in &list.plugins {
            let plugin_path = self.exec.find_in_path(&plugin.kind, &self.plugin_paths)?;
            let stdin = list
                .plugin_stdin(plugin, prev_result.as_ref())
                .map_err(|source| InvokeError::EncodeConfig {
                    plugin: plugin.kind.clone(),
                    source,
                })?;

            let stdout = self
                .exec
                .exec_plugin(&plugin_path, stdin, self.environment("ADD", rt))
                .await?;
            let result = AttachResult::from_bytes(&stdout).map_err(|source| {
                InvokeError::InvalidResult {
                    plugin: plugin.kind.clone(),
                    source,
                }
            })?;
            prev_result = Some(result);
        }

        let result = prev_result.ok_or_else(|| InvokeError::NoResult {
            network: list.name.clone(),
        })?;
        self.cache.store(list, rt, &result).await?;
        Ok(result)
    }
}
