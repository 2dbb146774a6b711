use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;

use crate::app::core::Application;
use crate::config::RunArgs;
use crate::domain::cni::cache::ResultCache;
use crate::domain::cni::invoke::CniInvoker;
use crate::domain::cni::invoke::RawExec;
use crate::domain::cni::Runtime;
use crate::domain::discovery::DeviceCatalog;
use crate::domain::driver::Driver;
use crate::domain::registration::HostRegistration;
use crate::domain::status::CniStatusHandler;
use crate::domain::store::MemoryStore;
use crate::infrastructure::kube_client::init_kube_client;

const DRIVER_PLUGIN_DIR_MODE: u32 = 0o750;

/// Application builder
pub struct ApplicationBuilder {
    run_args: RunArgs,
}

impl ApplicationBuilder {
    pub fn new(run_args: RunArgs) -> Self {
        Self { run_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let plugin_dir = self.run_args.driver_plugin_dir();
        DirBuilder::new()
            .recursive(true)
            .mode(DRIVER_PLUGIN_DIR_MODE)
            .create(&plugin_dir)
            .with_context(|| format!("create driver plugin directory {}", plugin_dir.display()))?;

        let client = init_kube_client(self.run_args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(DeviceCatalog::build(
            &self.run_args.node_name,
            &self.run_args.catalog_config(),
        ));
        tracing::info!(
            devices = catalog.len(),
            pool = %self.run_args.pool_name(),
            "Device catalog generated"
        );

        let invoker = CniInvoker::new(
            Arc::new(RawExec::new(self.run_args.chroot_dir())),
            self.run_args.cni_path.clone(),
            ResultCache::new(self.run_args.cni_cache_dir.clone()),
        );
        let runtime = Runtime::new(
            self.run_args.dra_driver_name.clone(),
            invoker,
            store.clone(),
            Some(Arc::new(CniStatusHandler::new(client))),
        );

        let driver = Arc::new(Driver::new(
            self.run_args.dra_driver_name.clone(),
            catalog,
            store,
            Arc::new(runtime),
        ));

        Ok(Application::new(
            driver,
            Arc::new(HostRegistration::new()),
            self.run_args,
        ))
    }
}
