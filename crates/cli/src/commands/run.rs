//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::ScanBlueprint;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    apply_overrides(&mut blueprint, args);

    let ranges = &blueprint.scan.frequency_ranges;
    info!(
        ranges = ranges.len(),
        points = ranges.iter().map(|r| r.points).sum::<usize>(),
        run_time = blueprint.scan.run_time,
        data_rate = blueprint.scan.data_rate,
        oversampling = blueprint.scan.oversampling_factor,
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - check the settings against the device limits and exit
    if args.dry_run {
        Pipeline::build_engine(&blueprint).context("Scan settings do not fit the devices")?;
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        max_lines: (args.max_lines > 0).then_some(args.max_lines),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        buffer_size: args.buffer_size,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        save_dir: (!args.no_save).then(|| blueprint.engine.data_dir.clone()),
        tag: args.tag.clone(),
        blueprint: blueprint.clone(),
    };

    info!("Starting scan...");
    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Scan pipeline failed")?;

    info!(
        lines = stats.lines,
        elapsed_secs = stats.elapsed_time,
        lines_per_sec = format!("{:.2}", stats.line_rate()),
        "Scan finished"
    );
    stats.print_summary();

    if args.no_persist {
        info!("Session values not written back (--no-persist)");
    } else if let (Some(params), Some(cw)) = (&stats.parameters, stats.cw) {
        blueprint.record_session(params, cw);
        config_loader::ConfigLoader::save_to_path(&blueprint, &args.config)
            .with_context(|| format!("Failed to write session to {}", args.config.display()))?;
        info!(config = %args.config.display(), "Session values written back");
    }

    if let Some(message) = stats.failure() {
        return Err(CliError::scan_failed(message).into());
    }

    info!("ODMR scan finished");
    Ok(())
}

/// Apply command-line overrides to the loaded blueprint
fn apply_overrides(blueprint: &mut ScanBlueprint, args: &RunArgs) {
    if let Some(run_time) = args.run_time {
        info!(run_time, "Overriding run time from CLI");
        blueprint.scan.run_time = run_time;
    }
    if let Some(ref output) = args.output {
        info!(output = %output.display(), "Overriding data directory from CLI");
        blueprint.engine.data_dir = output.clone();
    }
    if let Some(seed) = args.seed {
        blueprint.sampler.seed = Some(seed);
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &ScanBlueprint) {
    let scan = &blueprint.scan;
    println!("\n=== Configuration Summary ===\n");
    println!("Scan:");
    for (i, range) in scan.frequency_ranges.iter().enumerate() {
        println!(
            "  Range {}: {:.6e} Hz .. {:.6e} Hz, {} points",
            i, range.start, range.stop, range.points
        );
    }
    println!("  Scan power: {} dBm", scan.scan_power);
    println!("  Data rate: {} Hz (x{} oversampling)", scan.data_rate, scan.oversampling_factor);
    println!("  Run time: {} s", scan.run_time);
    println!("  CW: {:.6e} Hz at {} dBm", scan.cw_frequency, scan.cw_power);

    println!("\nDevices:");
    println!("  Microwave: {}", blueprint.microwave.name);
    println!(
        "  Sampler: {} ({} channels)",
        blueprint.sampler.name,
        blueprint.sampler.input_channel_units.len()
    );

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!("\nData directory: {}", blueprint.engine.data_dir.display());
    println!();
}
