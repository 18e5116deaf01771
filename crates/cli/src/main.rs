//! # ODMR Scan CLI
//!
//! `odmr-scan run | validate | info`. Logging goes through `observability`;
//! the Prometheus endpoint is only installed by `run --metrics-port`.

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::{error, info};

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // .env may provide ODMR_SCAN_* defaults
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    observability::init_with_config(ObservabilityConfig::from_verbosity(
        cli.log_format.into(),
        cli.verbose,
        cli.quiet,
    ))?;

    info!(version = env!("CARGO_PKG_VERSION"), command = cli.command.name(), "odmr-scan starting");

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        error!(error = %format!("{e:#}"), "Command failed");
    }
    result
}
