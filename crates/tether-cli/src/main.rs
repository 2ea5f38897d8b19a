//! Tether CLI - inspect and drain the offline sync queue

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let args = Cli::parse();
    let db_path = match args.db_path {
        Some(path) => path,
        None => commands::default_db_path()?,
    };

    match args.command {
        Commands::Status { json } => commands::run_status(&db_path, json),
        Commands::Pending { json } => commands::run_pending(&db_path, json),
        Commands::Drop { id } => commands::run_drop(&db_path, &id),
        Commands::Resolve {
            id,
            strategy,
            endpoint,
        } => commands::run_resolve(&db_path, &id, strategy.into(), &endpoint).await,
        Commands::Sync { endpoint } => commands::run_sync(&db_path, &endpoint).await,
    }
}
