use std::sync::Arc;

use anyhow::Result;

use crate::app::tasks::Tasks;
use crate::config::RunArgs;
use crate::domain::driver::Driver;
use crate::domain::registration::HostRegistration;

/// Application core structure with explicit dependencies
pub struct Application {
    driver: Arc<Driver>,
    registration: Arc<HostRegistration>,
    run_args: RunArgs,
}

impl Application {
    pub fn new(driver: Arc<Driver>, registration: Arc<HostRegistration>, run_args: RunArgs) -> Self {
        Self {
            driver,
            registration,
            run_args,
        }
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub fn registration(&self) -> &Arc<HostRegistration> {
        &self.registration
    }

    pub fn run_args(&self) -> &RunArgs {
        &self.run_args
    }

    /// Start the bridge, wait for the kubelet registration, then serve until a
    /// shutdown signal arrives or a task stops.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            plugin_name = %self.run_args.plugin_name,
            plugin_index = %self.run_args.plugin_index,
            driver = %self.driver.driver_name(),
            "Starting application tasks..."
        );

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_registration(self).await {
            tracing::error!("Driver registration failed: {e}");
            tasks.shutdown().await;
            return Err(e);
        }

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {e}");
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
