//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// ODMR Scan - frequency scan engine for a microwave source and a finite sampler
#[derive(Parser, Debug)]
#[command(
    name = "odmr-scan",
    author,
    version,
    about = "ODMR frequency scan engine",
    long_about = "Runs optically detected magnetic resonance frequency scans.\n\n\
                  Drives a microwave source through a frequency sequence while a \n\
                  finite sampler records one frame per line, averages the lines and \n\
                  dispatches progress to configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ODMR_SCAN_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "ODMR_SCAN_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one frequency scan
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Validate(_) => "validate",
            Commands::Info(_) => "info",
        }
    }
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "scan.toml", env = "ODMR_SCAN_CONFIG")]
    pub config: PathBuf,

    /// Override the scan run time in seconds
    #[arg(long, env = "ODMR_SCAN_RUN_TIME")]
    pub run_time: Option<f64>,

    /// Stop after this many lines (0 = until run time)
    #[arg(long, default_value = "0", env = "ODMR_SCAN_MAX_LINES")]
    pub max_lines: u64,

    /// Wall clock timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "ODMR_SCAN_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and device limits, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for saved scan data (overrides `engine.data_dir`)
    #[arg(short, long, env = "ODMR_SCAN_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Name tag prepended to saved file names
    #[arg(long)]
    pub tag: Option<String>,

    /// Do not save scan data when the scan ends
    #[arg(long)]
    pub no_save: bool,

    /// Do not write the final session values back to the config file
    #[arg(long)]
    pub no_persist: bool,

    /// Simulated sampler RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Channel buffer size for the snapshot queue
    #[arg(long, default_value = "100", env = "ODMR_SCAN_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "ODMR_SCAN_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "scan.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "scan.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show every frequency range
    #[arg(long)]
    pub ranges: bool,

    /// Show device limits and channels
    #[arg(long)]
    pub devices: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::parse_from([
            "odmr-scan",
            "run",
            "-c",
            "nv.toml",
            "--run-time",
            "2.5",
            "--max-lines",
            "10",
            "--no-persist",
            "--tag",
            "nv1",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.config, PathBuf::from("nv.toml"));
        assert_eq!(args.run_time, Some(2.5));
        assert_eq!(args.max_lines, 10);
        assert!(args.no_persist);
        assert!(!args.no_save);
        assert_eq!(args.tag.as_deref(), Some("nv1"));
    }
}
