//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::{FrequencyRange, ScanBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    scan: ScanInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    devices: Option<DevicesInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
    data_dir: String,
}

#[derive(Serialize)]
struct ScanInfo {
    range_count: usize,
    points_per_line: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ranges: Vec<FrequencyRange>,
    scan_power_dbm: f64,
    data_rate_hz: f64,
    oversampling_factor: usize,
    run_time_s: f64,
    scans_to_average: usize,
    cw_frequency_hz: f64,
    cw_power_dbm: f64,
    default_scan_mode: String,
}

#[derive(Serialize)]
struct DevicesInfo {
    microwave: MicrowaveInfo,
    sampler: SamplerInfo,
}

#[derive(Serialize)]
struct MicrowaveInfo {
    name: String,
    frequency_limits: String,
    power_limits: String,
    scan_size_limits: String,
    sample_rate_limits: String,
    scan_modes: Vec<String>,
}

#[derive(Serialize)]
struct SamplerInfo {
    name: String,
    sample_rate_limits: String,
    frame_size_limits: String,
    input_channels: BTreeMap<String, String>,
    simulation: String,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &ScanBlueprint, args: &InfoArgs) -> ConfigInfo {
    let scan = &blueprint.scan;
    let params = blueprint.scan_parameters();

    let devices = args.devices.then(|| {
        let mw = &blueprint.microwave;
        let sampler = &blueprint.sampler;
        DevicesInfo {
            microwave: MicrowaveInfo {
                name: mw.name.clone(),
                frequency_limits: mw.frequency_limits.to_string(),
                power_limits: mw.power_limits.to_string(),
                scan_size_limits: mw.scan_size_limits.to_string(),
                sample_rate_limits: mw.sample_rate_limits.to_string(),
                scan_modes: mw.supported_scan_modes.iter().map(|m| m.to_string()).collect(),
            },
            sampler: SamplerInfo {
                name: sampler.name.clone(),
                sample_rate_limits: sampler.sample_rate_limits.to_string(),
                frame_size_limits: sampler.frame_size_limits.to_string(),
                input_channels: sampler.input_channel_units.clone(),
                simulation: format!("{:?}", sampler.simulation),
            },
        }
    });

    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        scan: ScanInfo {
            range_count: scan.frequency_ranges.len(),
            points_per_line: params.points_per_line(),
            ranges: if args.ranges {
                scan.frequency_ranges.clone()
            } else {
                Vec::new()
            },
            scan_power_dbm: scan.scan_power,
            data_rate_hz: scan.data_rate,
            oversampling_factor: scan.oversampling_factor,
            run_time_s: scan.run_time,
            scans_to_average: scan.scans_to_average,
            cw_frequency_hz: scan.cw_frequency,
            cw_power_dbm: scan.cw_power,
            default_scan_mode: blueprint.engine.default_scan_mode.to_string(),
        },
        devices,
        sinks,
        data_dir: blueprint.engine.data_dir.display().to_string(),
    }
}

fn tree_prefix(index: usize, len: usize) -> &'static str {
    if index + 1 == len {
        "└─"
    } else {
        "├─"
    }
}

fn print_config_info(blueprint: &ScanBlueprint, args: &InfoArgs) {
    let scan = &blueprint.scan;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  ODMR Scan Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📡 Scan");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!(
        "   ├─ Ranges: {} ({} points per line)",
        scan.frequency_ranges.len(),
        blueprint.scan_parameters().points_per_line()
    );
    if args.ranges {
        for (i, range) in scan.frequency_ranges.iter().enumerate() {
            println!(
                "   │  {} {:.6e} Hz .. {:.6e} Hz, {} points",
                tree_prefix(i, scan.frequency_ranges.len()),
                range.start,
                range.stop,
                range.points
            );
        }
    }
    println!("   ├─ Scan power: {} dBm", scan.scan_power);
    println!(
        "   ├─ Data rate: {} Hz (x{} oversampling)",
        scan.data_rate, scan.oversampling_factor
    );
    println!("   ├─ Run time: {} s", scan.run_time);
    if scan.scans_to_average == 0 {
        println!("   ├─ Averaging: all lines");
    } else {
        println!("   ├─ Averaging: last {} lines", scan.scans_to_average);
    }
    println!("   ├─ Default mode: {}", blueprint.engine.default_scan_mode);
    println!(
        "   └─ CW: {:.6e} Hz at {} dBm",
        scan.cw_frequency, scan.cw_power
    );

    let mw = &blueprint.microwave;
    let sampler = &blueprint.sampler;
    println!("\n🔧 Devices");
    println!("   ├─ Microwave: {}", mw.name);
    if args.devices {
        println!("   │  ├─ Frequency: {} Hz", mw.frequency_limits);
        println!("   │  ├─ Power: {} dBm", mw.power_limits);
        println!("   │  ├─ Scan size: {}", mw.scan_size_limits);
        println!("   │  ├─ Sample rate: {} Hz", mw.sample_rate_limits);
        let modes: Vec<String> = mw.supported_scan_modes.iter().map(|m| m.to_string()).collect();
        println!("   │  └─ Modes: {}", modes.join(", "));
    }
    println!("   └─ Sampler: {}", sampler.name);
    if args.devices {
        println!("      ├─ Sample rate: {} Hz", sampler.sample_rate_limits);
        println!("      ├─ Frame size: {}", sampler.frame_size_limits);
        println!("      ├─ Simulation: {:?}", sampler.simulation);
        let channels = &sampler.input_channel_units;
        println!("      └─ Channels ({}):", channels.len());
        for (i, (name, unit)) in channels.iter().enumerate() {
            println!("         {} {} ({})", tree_prefix(i, channels.len()), name, unit);
        }
    }

    if args.sinks && !blueprint.sinks.is_empty() {
        println!("\n📤 Sinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            println!(
                "   {} {} ({:?}, queue {})",
                tree_prefix(i, blueprint.sinks.len()),
                sink.name,
                sink.sink_type,
                sink.queue_capacity
            );
        }
    }

    println!("\n💾 Data directory: {}", blueprint.engine.data_dir.display());
    println!();
}
