//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::ScanBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::error::CliError;
use crate::pipeline::Pipeline;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    range_count: usize,
    points_per_line: usize,
    run_time: f64,
    estimated_lines: usize,
    channel_count: usize,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        Err(CliError::InvalidConfig.into())
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Syntax and field rules, then the combined device limits
    let checked = config_loader::ConfigLoader::load_from_path(&args.config)
        .map_err(|e| e.to_string())
        .and_then(|blueprint| match Pipeline::build_engine(&blueprint) {
            Ok(_) => Ok(blueprint),
            Err(e) => Err(format!("{e:#}")),
        });

    match checked {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            let params = blueprint.scan_parameters();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    range_count: params.frequency_ranges.len(),
                    points_per_line: params.points_per_line(),
                    run_time: params.run_time,
                    estimated_lines: scan_engine::estimated_lines(&params),
                    channel_count: blueprint.sampler.input_channel_units.len(),
                    sink_count: blueprint.sinks.len(),
                }),
            }
        }
        Err(error) => ValidationResult {
            valid: false,
            config_path,
            error: Some(error),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &ScanBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - progress is only logged by the CLI".to_string());
    }

    let scan = &blueprint.scan;
    if scan.run_time < 1.0 {
        warnings.push(format!(
            "scan.run_time {} s is below 1 s and will be raised to 1 s",
            scan.run_time
        ));
    }

    let power = blueprint.microwave.power_limits;
    for (field, value) in [("scan.scan_power", scan.scan_power), ("scan.cw_power", scan.cw_power)] {
        if !power.contains(value) {
            warnings.push(format!(
                "{field} {value} dBm is outside {power} and will be clipped"
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Frequency ranges: {}", summary.range_count);
            println!("  Points per line: {}", summary.points_per_line);
            println!(
                "  Run time: {} s (~{} lines)",
                summary.run_time, summary.estimated_lines
            );
            println!("  Channels: {}", summary.channel_count);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
