use anyhow::Result;
use clap::Parser;
use cni_dra_driver::app::ApplicationBuilder;
use cni_dra_driver::config::Cli;
use cni_dra_driver::config::Commands;
use cni_dra_driver::config::RunArgs;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run_driver(*run_args).await,
    }
}

async fn run_driver(run_args: RunArgs) -> Result<()> {
    let _guard = logging::init(std::env::var(logging::LOG_PATH_ENV_VAR).ok())?;

    tracing::info!(
        "Starting CNI DRA driver {} on node {}",
        &**version::VERSION,
        run_args.node_name
    );

    let app = ApplicationBuilder::new(run_args).build().await?;
    app.run().await?;

    Ok(())
}
