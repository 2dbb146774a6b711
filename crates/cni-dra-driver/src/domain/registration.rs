//! Kubelet plugin registration
//!
//! The kubelet reports back once it has picked up the plugin socket. Startup waits for
//! that report and gives up after a bounded time.

use core::error::Error;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use api_types::RegistrationStatus;
use error_stack::Report;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;

use super::traits::PluginHost;

pub const REGISTRATION_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, derive_more::Display)]
pub enum RegistrationError {
    #[display("Plugin was not registered within {timeout:?}")]
    Timeout { timeout: Duration },
}

impl Error for RegistrationError {}

/// Registration state fed by the kubelet callback
#[derive(Debug, Default)]
pub struct HostRegistration {
    status: RwLock<Option<RegistrationStatus>>,
}

impl HostRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the status the kubelet reported.
    pub fn notify(&self, status: RegistrationStatus) {
        info!(
            registered = status.plugin_registered,
            error = %status.error,
            "registration status reported"
        );
        *self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

impl PluginHost for HostRegistration {
    fn registration_status(&self) -> Option<RegistrationStatus> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Poll `host` every `interval` until it reports a successful registration.
///
/// The first check happens immediately.
///
/// # Errors
///
/// - [`RegistrationError::Timeout`] if the plugin is not registered within `timeout`
pub async fn wait_for_registration(
    host: &dyn PluginHost,
    interval: Duration,
    timeout: Duration,
) -> Result<(), Report<RegistrationError>> {
    let deadline = Instant::now() + timeout;
    let mut last_status = None;

    loop {
        match host.registration_status() {
            Some(status) if status.plugin_registered => {
                info!("plugin registered with the kubelet");
                return Ok(());
            }
            status => {
                debug!(status = ?status, "plugin not registered yet");
                last_status = status.or(last_status);
            }
        }

        if Instant::now() + interval > deadline {
            let mut report = Report::new(RegistrationError::Timeout { timeout });
            if let Some(status) = last_status.filter(|status| !status.error.is_empty()) {
                report = report.attach_printable(format!("last registration error: {}", status.error));
            }
            return Err(report);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;

    use super::*;

    const INTERVAL: Duration = Duration::from_millis(10);

    #[test_log::test(tokio::test)]
    async fn registered_host_returns_immediately() {
        let host = HostRegistration::new();
        host.notify(RegistrationStatus {
            plugin_registered: true,
            error: String::new(),
        });

        let started = Instant::now();
        wait_for_registration(&host, Duration::from_secs(5), Duration::from_secs(30))
            .await
            .expect("already registered");

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test_log::test(tokio::test)]
    async fn late_registration_is_picked_up() {
        let host = Arc::new(HostRegistration::new());
        let notifier = host.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            notifier.notify(RegistrationStatus {
                plugin_registered: true,
                error: String::new(),
            });
        });

        wait_for_registration(host.as_ref(), INTERVAL, Duration::from_secs(5))
            .await
            .expect("registered while polling");
    }

    #[test_log::test(tokio::test)]
    async fn missing_registration_times_out() {
        let host = HostRegistration::new();
        host.notify(RegistrationStatus {
            plugin_registered: false,
            error: "socket not found".to_string(),
        });

        let err = wait_for_registration(&host, INTERVAL, Duration::from_millis(50))
            .await
            .expect_err("never registered");

        assert!(matches!(
            err.current_context(),
            RegistrationError::Timeout { .. }
        ));
        assert!(format!("{err:?}").contains("socket not found"));
    }

    #[test]
    fn status_is_unset_until_notified() {
        let host = HostRegistration::new();
        assert_eq!(host.registration_status(), None);
    }
}
