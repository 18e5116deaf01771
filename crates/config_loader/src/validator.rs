//! Config validation
//!
//! Rules:
//! - field-level ranges declared on the blueprint types
//! - min <= max and finite bounds for every device limit
//! - frequency ranges: >= 2 points, start != stop, inside the source frequency limits
//! - more than one range requires jump list support
//! - the default scan mode must be supported by the source
//! - sink names present and unique

use std::collections::HashSet;

use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};
use contracts::{ContractError, ScanBlueprint, ScanMode};

/// Validate a ScanBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &ScanBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_device_limits(blueprint)?;
    validate_frequency_ranges(blueprint)?;
    validate_scan_modes(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

/// Run the derive-level rules
fn validate_fields(blueprint: &ScanBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        let (field, message) = first_violation(&errors, "")
            .unwrap_or_else(|| ("blueprint".to_string(), errors.to_string()));
        ContractError::configuration(field, message)
    })
}

/// Walk the error tree in key order and report the first leaf
fn first_violation(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in fields {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(error) = list.first() {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' check", error.code));
                    return Some((path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_violation(inner, &path) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    if let Some(found) = first_violation(inner, &format!("{path}[{idx}]")) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

/// Validate every limit pair of the simulated devices
fn validate_device_limits(blueprint: &ScanBlueprint) -> Result<(), ContractError> {
    let mw = &blueprint.microwave;
    mw.frequency_limits.check("microwave.frequency_limits")?;
    mw.power_limits.check("microwave.power_limits")?;
    mw.scan_size_limits.check("microwave.scan_size_limits")?;
    mw.sample_rate_limits.check("microwave.sample_rate_limits")?;

    let sampler = &blueprint.sampler;
    sampler
        .sample_rate_limits
        .check("sampler.sample_rate_limits")?;
    sampler.frame_size_limits.check("sampler.frame_size_limits")?;
    if sampler.sample_rate_limits.min() <= 0.0 {
        return Err(ContractError::configuration(
            "sampler.sample_rate_limits",
            "minimum sample rate must be > 0",
        ));
    }

    let channels = sampler
        .input_channel_units
        .keys()
        .chain(sampler.output_channel_units.keys());
    for name in channels {
        if name.trim().is_empty() {
            return Err(ContractError::configuration(
                "sampler.channel_units",
                "channel name cannot be empty",
            ));
        }
    }
    Ok(())
}

/// Validate the recalled frequency ranges against the source limits
fn validate_frequency_ranges(blueprint: &ScanBlueprint) -> Result<(), ContractError> {
    let limits = blueprint.microwave.frequency_limits;
    for (idx, range) in blueprint.scan.frequency_ranges.iter().enumerate() {
        let field = format!("scan.frequency_ranges[{idx}]");
        range.check(&field)?;
        for bound in [range.start, range.stop] {
            if !limits.contains(bound) {
                return Err(ContractError::configuration(
                    field,
                    format!("{bound} Hz is outside the microwave frequency limits {limits}"),
                ));
            }
        }
    }
    Ok(())
}

/// Validate scan modes
fn validate_scan_modes(blueprint: &ScanBlueprint) -> Result<(), ContractError> {
    let supported = &blueprint.microwave.supported_scan_modes;
    if supported.is_empty() {
        return Err(ContractError::configuration(
            "microwave.supported_scan_modes",
            "at least one scan mode is required",
        ));
    }

    let default_mode = blueprint.engine.default_scan_mode;
    if !supported.contains(&default_mode) {
        return Err(ContractError::configuration(
            "engine.default_scan_mode",
            format!("{default_mode} is not supported by the microwave source"),
        ));
    }

    if blueprint.scan.frequency_ranges.len() > 1 && !supported.contains(&ScanMode::JumpList) {
        return Err(ContractError::configuration(
            "scan.frequency_ranges",
            "multiple ranges require jump_list support",
        ));
    }

    let single_sweep = blueprint.scan.frequency_ranges.len() <= 1
        && default_mode == ScanMode::EquidistantSweep;
    if single_sweep && blueprint.scan.oversampling_factor > 1 {
        return Err(ContractError::configuration(
            "scan.oversampling_factor",
            "equidistant_sweep steps once per point, oversampling must be 1",
        ));
    }
    Ok(())
}

/// Validate sink config
fn validate_sinks(blueprint: &ScanBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::configuration(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::configuration(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
    }
    Ok(())
}
