//! MicrowaveDevice trait - microwave source consumed by the scan engine
//!
//! The engine only ever talks to a source through this contract. Every call may
//! take hundreds of milliseconds and returns only once the hardware state matches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{ContractError, CwParameters, Limits, SampleSequence, ScanMode};

/// Output state of a microwave source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrowaveMode {
    /// Continuous wave at a fixed frequency
    Cw,
    /// Triggered jump list
    List,
    /// Triggered equidistant sweep
    Sweep,
}

impl From<ScanMode> for MicrowaveMode {
    fn from(mode: ScanMode) -> Self {
        match mode {
            ScanMode::JumpList => MicrowaveMode::List,
            ScanMode::EquidistantSweep => MicrowaveMode::Sweep,
        }
    }
}

/// Hardware limits of a microwave source. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConstraints {
    frequency_limits: Limits<f64>,
    power_limits: Limits<f64>,
    scan_size_limits: Limits<usize>,
    sample_rate_limits: Limits<f64>,
    supported_scan_modes: BTreeSet<ScanMode>,
}

impl ScanConstraints {
    /// # Errors
    /// `Configuration` if a limit pair is inverted or no scan mode is supported
    pub fn new(
        frequency_limits: Limits<f64>,
        power_limits: Limits<f64>,
        scan_size_limits: Limits<usize>,
        sample_rate_limits: Limits<f64>,
        supported_scan_modes: BTreeSet<ScanMode>,
    ) -> Result<Self, ContractError> {
        frequency_limits.check("frequency_limits")?;
        power_limits.check("power_limits")?;
        scan_size_limits.check("scan_size_limits")?;
        sample_rate_limits.check("sample_rate_limits")?;
        if supported_scan_modes.is_empty() {
            return Err(ContractError::configuration(
                "supported_scan_modes",
                "at least one scan mode is required",
            ));
        }
        Ok(Self {
            frequency_limits,
            power_limits,
            scan_size_limits,
            sample_rate_limits,
            supported_scan_modes,
        })
    }

    pub fn frequency_limits(&self) -> Limits<f64> {
        self.frequency_limits
    }

    pub fn power_limits(&self) -> Limits<f64> {
        self.power_limits
    }

    pub fn scan_size_limits(&self) -> Limits<usize> {
        self.scan_size_limits
    }

    pub fn sample_rate_limits(&self) -> Limits<f64> {
        self.sample_rate_limits
    }

    pub fn supported_scan_modes(&self) -> &BTreeSet<ScanMode> {
        &self.supported_scan_modes
    }

    pub fn supports(&self, mode: ScanMode) -> bool {
        self.supported_scan_modes.contains(&mode)
    }

    pub fn frequency_in_range(&self, frequency: f64) -> bool {
        self.frequency_limits.contains(frequency)
    }

    pub fn power_in_range(&self, power: f64) -> bool {
        self.power_limits.contains(power)
    }

    /// Validate a full scan request against these limits
    ///
    /// # Errors
    /// `Configuration` naming the first violated limit
    pub fn check_scan(
        &self,
        power: f64,
        frequencies: &SampleSequence,
        mode: ScanMode,
        sample_rate: f64,
    ) -> Result<(), ContractError> {
        if !self.supports(mode) {
            return Err(ContractError::configuration(
                "mode",
                format!("scan mode {mode} is not supported"),
            ));
        }
        if frequencies.mode() != mode {
            return Err(ContractError::configuration(
                "frequencies",
                format!("{} frequency data given for {mode}", frequencies.mode()),
            ));
        }
        self.power_limits.require("power", power)?;
        self.sample_rate_limits.require("sample_rate", sample_rate)?;
        self.scan_size_limits.require("scan_size", frequencies.len())?;
        let values = frequencies.values();
        if let Some(bad) = values.iter().find(|f| !self.frequency_in_range(**f)) {
            return Err(ContractError::configuration(
                "frequencies",
                format!("{bad} Hz is outside of {}", self.frequency_limits),
            ));
        }
        Ok(())
    }
}

/// Microwave source contract
///
/// Methods take `&self`; implementations guard their own state.
#[trait_variant::make(MicrowaveDevice: Send)]
pub trait LocalMicrowaveDevice {
    /// Device name (used for logging/errors)
    fn name(&self) -> &str;

    fn constraints(&self) -> &ScanConstraints;

    /// Current output mode, `None` when the output is off
    fn output_mode(&self) -> Option<MicrowaveMode>;

    /// Output is on in LIST or SWEEP mode
    fn is_scanning(&self) -> bool;

    /// Power of the configured scan (dBm)
    fn scan_power(&self) -> f64;

    /// Frequencies of the configured scan, if any
    fn scan_frequencies(&self) -> Option<SampleSequence>;

    /// Trigger rate of the configured scan (Hz)
    fn scan_sample_rate(&self) -> f64;

    fn cw_parameters(&self) -> CwParameters;

    /// Set CW frequency/power. Returns the values actually applied.
    ///
    /// # Errors
    /// `HardwareState` while the output is on, `Configuration` for out of range values
    async fn set_cw(&self, frequency: f64, power: f64) -> Result<CwParameters, ContractError>;

    /// Switch on CW output
    ///
    /// # Errors
    /// `HardwareState` while a scan is running
    async fn cw_on(&self) -> Result<(), ContractError>;

    /// Configure a triggered scan
    ///
    /// # Errors
    /// `HardwareState` if the output is on, `Configuration` if arguments violate constraints.
    /// Neither case changes the configured scan.
    async fn configure_scan(
        &self,
        power: f64,
        frequencies: &SampleSequence,
        mode: ScanMode,
        sample_rate: f64,
    ) -> Result<(), ContractError>;

    /// Switch on scan output; returns once the output is verified active
    ///
    /// # Errors
    /// `HardwareState` if CW is active or no scan is configured
    async fn start_scan(&self) -> Result<(), ContractError>;

    /// Jump back to the first frequency without stopping the output
    ///
    /// # Errors
    /// `InvalidState` if the output is off or in CW mode
    async fn reset_scan(&self) -> Result<(), ContractError>;

    /// Switch off any output. Idempotent; returns once the output is off.
    async fn off(&self) -> Result<(), ContractError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(modes: &[ScanMode]) -> ScanConstraints {
        ScanConstraints::new(
            Limits::new(100e3, 20e9).unwrap(),
            Limits::new(-120.0, 30.0).unwrap(),
            Limits::new(2, 10001).unwrap(),
            Limits::new(0.001, 1000.0).unwrap(),
            modes.iter().copied().collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_mode_set_rejected() {
        let result = ScanConstraints::new(
            Limits::new(100e3, 20e9).unwrap(),
            Limits::new(-120.0, 30.0).unwrap(),
            Limits::new(2, 10001).unwrap(),
            Limits::new(0.001, 1000.0).unwrap(),
            BTreeSet::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_check_scan() {
        let c = constraints(&[ScanMode::JumpList]);
        let list = SampleSequence::Explicit(vec![2.87e9, 2.88e9]);
        assert!(c.check_scan(-10.0, &list, ScanMode::JumpList, 100.0).is_ok());

        let sweep = SampleSequence::Linear {
            start: 2.8e9,
            stop: 2.9e9,
            points: 11,
        };
        let err = c
            .check_scan(-10.0, &sweep, ScanMode::EquidistantSweep, 100.0)
            .unwrap_err();
        assert!(err.is_configuration());

        // shape does not match the requested mode
        assert!(c.check_scan(-10.0, &sweep, ScanMode::JumpList, 100.0).is_err());
        assert!(c.check_scan(50.0, &list, ScanMode::JumpList, 100.0).is_err());
        assert!(c.check_scan(-10.0, &list, ScanMode::JumpList, 5000.0).is_err());

        let too_high = SampleSequence::Explicit(vec![2.87e9, 30e9]);
        assert!(c.check_scan(-10.0, &too_high, ScanMode::JumpList, 100.0).is_err());
    }
}
