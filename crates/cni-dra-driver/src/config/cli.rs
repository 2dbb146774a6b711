use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::run::RunArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the cni-dra-driver
    Run(Box<RunArgs>),
}
