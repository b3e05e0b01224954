use std::path::PathBuf;

use cashflow_deploy::{ALL_TAG, CONFIG_FILENAME, FlowKind};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "cashflow")]
#[command(
    author,
    version,
    about = "Deploy contracts and manage Superfluid money streams"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "CASHFLOW_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration file.
    #[arg(short, long, global = true, alias = "conf", env = "CASHFLOW_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// The network to operate on.
    ///
    /// If not provided, the `default_network` of the configuration is used.
    #[arg(short, long, global = true, env = "CASHFLOW_NETWORK")]
    pub network: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy the contracts selected by tags, dependencies first.
    ///
    /// Contracts already deployed with the same constructor arguments and
    /// bytecode are skipped.
    Deploy {
        /// Comma-separated deployment tags. `all` selects every declaration.
        #[arg(long, value_delimiter = ',', default_value = ALL_TAG)]
        tags: Vec<String>,
    },

    /// Open a money stream to a receiver.
    CreateFlow(FlowArgs),

    /// Change the rate of an existing money stream.
    UpdateFlow(FlowArgs),

    /// Close a money stream.
    DeleteFlow(DeleteFlowArgs),

    /// List the deployments recorded for the network.
    Deployments,
}

impl Command {
    /// The flow operation this command performs, if any.
    pub fn flow_kind(&self) -> Option<FlowKind> {
        match self {
            Self::CreateFlow(_) => Some(FlowKind::Create),
            Self::UpdateFlow(_) => Some(FlowKind::Update),
            Self::DeleteFlow(_) => Some(FlowKind::Delete),
            Self::Deploy { .. } | Self::Deployments => None,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct FlowArgs {
    /// Address receiving the stream.
    #[arg(long)]
    pub receiver: String,

    /// Super token to stream, as a configured symbol (e.g. fDAIx) or address.
    #[arg(long)]
    pub token: String,

    /// Flow rate in wei per second.
    #[arg(long, allow_hyphen_values = true)]
    pub flow_rate: i128,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteFlowArgs {
    /// Address receiving the stream.
    #[arg(long)]
    pub receiver: String,

    /// Super token of the stream, as a configured symbol or address.
    #[arg(long)]
    pub token: String,
}
