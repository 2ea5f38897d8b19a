use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tether_core::MergeStrategy;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Inspect and drain the offline sync queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show sync state (pending count, conflicts, last sync time)
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued mutations in drain order
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a queued mutation without replaying it
    Drop {
        /// Queue item ID
        id: String,
    },
    /// Resolve a conflicted mutation with a chosen strategy
    Resolve {
        /// Queue item ID
        id: String,
        /// Resolution strategy
        #[arg(long, value_enum, default_value_t = StrategyArg::Merge)]
        strategy: StrategyArg,
        /// Remote service endpoint base URL
        #[arg(long, value_name = "URL")]
        endpoint: String,
    },
    /// Drain the queue once against a remote endpoint
    Sync {
        /// Remote service endpoint base URL
        #[arg(long, value_name = "URL")]
        endpoint: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    ServerWins,
    LocalWins,
    Merge,
}

impl From<StrategyArg> for MergeStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::ServerWins => Self::ServerWins,
            StrategyArg::LocalWins => Self::LocalWins,
            StrategyArg::Merge => Self::Merge,
        }
    }
}
