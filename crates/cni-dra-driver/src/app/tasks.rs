use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::handlers::BridgeState;
use crate::api::ApiServer;
use crate::app::core::Application;
use crate::domain::registration::wait_for_registration;
use crate::domain::registration::REGISTRATION_POLL_INTERVAL;
use crate::domain::registration::REGISTRATION_TIMEOUT;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and stopping the background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let bridge_task = self.spawn_bridge_task(app);
        self.tasks.push(bridge_task);
    }

    fn spawn_bridge_task(&self, app: &Application) -> JoinHandle<()> {
        let args = app.run_args();
        let state = BridgeState {
            driver: app.driver().clone(),
            registration: app.registration().clone(),
            pool_name: args.pool_name().to_string(),
        };
        let listen_addr = args.listen_addr.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            let server = ApiServer::new(state, listen_addr);
            if let Err(e) = server.run(token).await {
                tracing::error!("Plugin bridge failed: {e:?}");
            } else {
                tracing::info!("Plugin bridge completed");
            }
        })
    }

    /// Block until the kubelet confirmed the plugin registration.
    ///
    /// Fails early when a spawned task, such as the plugin bridge, stops before the
    /// registration arrived.
    pub async fn wait_for_registration(&mut self, app: &Application) -> Result<()> {
        let registration = wait_for_registration(
            app.registration().as_ref(),
            REGISTRATION_POLL_INTERVAL,
            REGISTRATION_TIMEOUT,
        );
        if self.tasks.is_empty() {
            return registration
                .await
                .map_err(|e| anyhow::anyhow!("Failed to register driver: {e:?}"));
        }

        tokio::select! {
            result = registration => {
                result.map_err(|e| anyhow::anyhow!("Failed to register driver: {e:?}"))
            }
            (result, index, _remaining) = futures::future::select_all(&mut self.tasks) => {
                // a finished handle must not be awaited again on shutdown
                self.tasks.remove(index);
                match result {
                    Ok(()) => Err(anyhow::anyhow!("Task stopped before the driver was registered")),
                    Err(e) => Err(anyhow::anyhow!("Task failed before the driver was registered: {e}")),
                }
            }
            _ = self.cancellation_token.cancelled() => {
                Err(anyhow::anyhow!("Shutdown requested before registration completed"))
            }
        }
    }

    /// Wait for tasks to complete or a shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            use tokio::signal::unix::signal;
            use tokio::signal::unix::SignalKind;
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT, initiating graceful shutdown");
                    }
                }
            })
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.shutdown().await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    /// Cancel every task and wait for them to stop.
    pub async fn shutdown(&mut self) {
        self.cancellation_token.cancel();
        tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", SHUTDOWN_TIMEOUT);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use api_types::RegistrationStatus;
    use clap::Parser;

    use super::*;
    use crate::config::Cli;
    use crate::config::Commands;
    use crate::domain::cni::testing::invoker;
    use crate::domain::cni::testing::SpyExec;
    use crate::domain::cni::testing::DRIVER;
    use crate::domain::cni::Runtime;
    use crate::domain::discovery::CatalogConfig;
    use crate::domain::discovery::DeviceCatalog;
    use crate::domain::driver::Driver;
    use crate::domain::registration::HostRegistration;
    use crate::domain::store::MemoryStore;

    fn application(listen_addr: &str, cache_dir: &tempfile::TempDir) -> Application {
        let cli = Cli::try_parse_from([
            "cni-dra-driver",
            "run",
            "--node-name",
            "node-1",
            "--listen-addr",
            listen_addr,
        ])
        .expect("should parse");
        let Commands::Run(run_args) = cli.command;

        let store = Arc::new(MemoryStore::new());
        let runtime = Runtime::new(
            DRIVER,
            invoker(Arc::new(SpyExec::default()), cache_dir.path()),
            store.clone(),
            None,
        );
        let catalog = DeviceCatalog::build("node-1", &CatalogConfig::default());
        let driver = Driver::new(DRIVER, Arc::new(catalog), store, Arc::new(runtime));
        Application::new(
            Arc::new(driver),
            Arc::new(HostRegistration::new()),
            *run_args,
        )
    }

    #[test_log::test(tokio::test)]
    async fn bridge_bind_failure_ends_the_registration_wait() {
        let cache_dir = tempfile::tempdir().expect("tempdir");
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = occupied.local_addr().expect("addr").to_string();
        let app = application(&addr, &cache_dir);

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(&app);
        let result = tokio::time::timeout(Duration::from_secs(5), tasks.wait_for_registration(&app))
            .await
            .expect("should not wait for the registration timeout");

        assert!(result.is_err());
        assert!(tasks.tasks.is_empty());
        tasks.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn reported_registration_ends_the_wait() {
        let cache_dir = tempfile::tempdir().expect("tempdir");
        let app = application("127.0.0.1:0", &cache_dir);
        app.registration().notify(RegistrationStatus {
            plugin_registered: true,
            error: String::new(),
        });

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(&app);
        tasks
            .wait_for_registration(&app)
            .await
            .expect("already registered");

        assert_eq!(tasks.tasks.len(), 1);
        tasks.shutdown().await;
    }
}
