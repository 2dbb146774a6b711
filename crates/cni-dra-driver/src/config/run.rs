use std::path::PathBuf;

use clap::Parser;

use crate::domain::discovery::CatalogConfig;

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long,
        default_value = "cni-dra-driver",
        help = "Plugin name to register with the container runtime"
    )]
    pub plugin_name: String,

    #[arg(
        long,
        default_value = "",
        help = "Plugin index to register with the container runtime"
    )]
    pub plugin_index: String,

    #[arg(
        long,
        default_value = "/opt/cni/bin",
        value_delimiter = ':',
        help = "Directories searched for CNI plugin binaries, ':' separated"
    )]
    pub cni_path: Vec<PathBuf>,

    #[arg(
        long,
        default_value = "/var/lib/cni/cni-dra-driver",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory of the CNI result cache"
    )]
    pub cni_cache_dir: PathBuf,

    #[arg(
        long,
        default_value = "/hostroot",
        help = "Host filesystem root CNI plugins are executed in, empty to run them in place"
    )]
    pub chroot_dir: String,

    #[arg(
        long,
        default_value = "cni.dra.networking.x-k8s.io",
        help = "DRA driver name"
    )]
    pub dra_driver_name: String,

    #[arg(long, env = "NODE_NAME", help = "Name of the node the driver runs on")]
    pub node_name: String,

    #[arg(
        long,
        help = "Resource pool the devices are published in (defaults to the node name)"
    )]
    pub pool_name: Option<String>,

    #[arg(long, default_value = "8", help = "The number of devices to be generated")]
    pub num_devices: usize,

    #[arg(
        long = "shared-devices",
        default_value = "1",
        help = "The number of shared devices without consumable capacity to be generated"
    )]
    pub num_shared_devices: usize,

    #[arg(
        long = "shared-devices-with-consumable-capacity",
        default_value = "1",
        help = "The number of shared devices with consumable capacity to be generated"
    )]
    pub num_shared_devices_with_consumable: usize,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        default_value = "/var/lib/kubelet/plugins",
        value_hint = clap::ValueHint::DirPath,
        help = "Kubelet plugin directory the driver directory is created in"
    )]
    pub kubelet_plugins_dir: PathBuf,

    #[arg(
        long,
        env = "CNI_DRA_LISTEN_ADDR",
        default_value = "127.0.0.1:9977",
        help = "Listen address of the plugin bridge"
    )]
    pub listen_addr: String,
}

impl RunArgs {
    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            num_devices: self.num_devices,
            num_shared_devices: self.num_shared_devices,
            num_shared_devices_with_consumable: self.num_shared_devices_with_consumable,
        }
    }

    pub fn pool_name(&self) -> &str {
        self.pool_name.as_deref().unwrap_or(&self.node_name)
    }

    /// `None` when plugins run directly in this filesystem.
    pub fn chroot_dir(&self) -> Option<PathBuf> {
        (!self.chroot_dir.is_empty()).then(|| PathBuf::from(&self.chroot_dir))
    }

    /// Directory the kubelet expects the driver's sockets in.
    pub fn driver_plugin_dir(&self) -> PathBuf {
        self.kubelet_plugins_dir.join(&self.dra_driver_name)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::Cli;
    use crate::config::Commands;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args).expect("should parse");
        match cli.command {
            Commands::Run(args) => *args,
        }
    }

    #[test]
    fn defaults_follow_the_node_agent_layout() {
        let args = parse(&["cni-dra-driver", "run", "--node-name", "node-1"]);

        assert_eq!(args.plugin_name, "cni-dra-driver");
        assert_eq!(args.plugin_index, "");
        assert_eq!(args.dra_driver_name, "cni.dra.networking.x-k8s.io");
        assert_eq!(args.pool_name(), "node-1");
        assert_eq!(args.chroot_dir(), Some(PathBuf::from("/hostroot")));
        assert_eq!(args.cni_cache_dir, PathBuf::from("/var/lib/cni/cni-dra-driver"));
        assert_eq!(
            args.driver_plugin_dir(),
            PathBuf::from("/var/lib/kubelet/plugins/cni.dra.networking.x-k8s.io")
        );
        assert_eq!(args.listen_addr, "127.0.0.1:9977");
        assert_eq!(args.catalog_config(), CatalogConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let args = parse(&[
            "cni-dra-driver",
            "run",
            "--node-name",
            "node-1",
            "--pool-name",
            "pool-a",
            "--cni-path",
            "/opt/cni/bin:/usr/libexec/cni",
            "--chroot-dir",
            "",
            "--num-devices",
            "2",
            "--shared-devices",
            "0",
            "--shared-devices-with-consumable-capacity",
            "3",
        ]);

        assert_eq!(args.pool_name(), "pool-a");
        assert_eq!(
            args.cni_path,
            vec![
                PathBuf::from("/opt/cni/bin"),
                PathBuf::from("/usr/libexec/cni")
            ]
        );
        assert_eq!(args.chroot_dir(), None);
        assert_eq!(
            args.catalog_config(),
            CatalogConfig {
                num_devices: 2,
                num_shared_devices: 0,
                num_shared_devices_with_consumable: 3,
            }
        );
    }
}
