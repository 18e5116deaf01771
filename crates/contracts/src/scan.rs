//! Scan vocabulary shared by the devices, the engine and its observers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ContractError;

/// How the microwave source steps through frequencies on each trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Explicit ordered list of discrete frequencies
    JumpList,
    /// `(start, stop, points)` with uniform spacing
    EquidistantSweep,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::JumpList => write!(f, "jump_list"),
            ScanMode::EquidistantSweep => write!(f, "equidistant_sweep"),
        }
    }
}

/// Sequence of values a device steps through, one per sample clock tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSequence {
    Explicit(Vec<f64>),
    Linear { start: f64, stop: f64, points: usize },
}

impl SampleSequence {
    /// Scan mode implied by the sequence shape
    pub fn mode(&self) -> ScanMode {
        match self {
            SampleSequence::Explicit(_) => ScanMode::JumpList,
            SampleSequence::Linear { .. } => ScanMode::EquidistantSweep,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleSequence::Explicit(values) => values.len(),
            SampleSequence::Linear { points, .. } => *points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize every value
    pub fn values(&self) -> Vec<f64> {
        match self {
            SampleSequence::Explicit(values) => values.clone(),
            SampleSequence::Linear {
                start,
                stop,
                points,
            } => linspace(*start, *stop, *points),
        }
    }
}

/// Evenly spaced values from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// One equidistant frequency range `(start, stop, points)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    /// Start frequency (Hz)
    pub start: f64,
    /// Stop frequency (Hz), included
    pub stop: f64,
    /// Number of frequency bins, >= 2
    pub points: usize,
}

impl FrequencyRange {
    pub fn new(start: f64, stop: f64, points: usize) -> Self {
        Self {
            start,
            stop,
            points,
        }
    }

    /// Frequency axis of this range
    pub fn frequencies(&self) -> Vec<f64> {
        linspace(self.start, self.stop, self.points)
    }

    /// Shape checks that do not depend on any device.
    ///
    /// # Errors
    /// `Configuration` for non-finite bounds, `start == stop` or fewer than 2 points
    pub fn check(&self, field: &str) -> Result<(), ContractError> {
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(ContractError::configuration(
                field,
                "start and stop must be finite",
            ));
        }
        if self.points < 2 {
            return Err(ContractError::configuration(
                format!("{field}.points"),
                format!("a range needs at least 2 points, got {}", self.points),
            ));
        }
        if self.start == self.stop {
            return Err(ContractError::configuration(
                field,
                format!("start and stop are both {}", self.start),
            ));
        }
        Ok(())
    }
}

impl Default for FrequencyRange {
    fn default() -> Self {
        Self::new(2820e6, 2920e6, 101)
    }
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    CwActive,
    Scanning,
    Paused,
}

impl ScanState {
    /// A scan session is armed (running or held)
    pub fn is_active(&self) -> bool {
        matches!(self, ScanState::Scanning | ScanState::Paused)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanState::Idle => "idle",
            ScanState::CwActive => "cw output is active",
            ScanState::Scanning => "scanning",
            ScanState::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Scan settings as accepted by the engine (post validation/clamping)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub frequency_ranges: Vec<FrequencyRange>,
    /// Microwave power during the scan (dBm)
    pub scan_power: f64,
    /// Logical bins per second
    pub data_rate: f64,
    /// Raw samples per bin
    pub oversampling_factor: usize,
    /// Scan duration (s)
    pub run_time: f64,
    /// Lines entering the signal average, 0 = all
    pub scans_to_average: usize,
}

impl ScanParameters {
    /// Hardware sample rate: `data_rate * oversampling_factor`
    pub fn sample_rate(&self) -> f64 {
        self.data_rate * self.oversampling_factor as f64
    }

    /// Logical frequency bins per line across all ranges
    pub fn points_per_line(&self) -> usize {
        self.frequency_ranges.iter().map(|r| r.points).sum()
    }
}

/// Continuous-wave output settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CwParameters {
    /// Frequency (Hz)
    pub frequency: f64,
    /// Power (dBm)
    pub power: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace_includes_endpoints() {
        let values = FrequencyRange::new(2.82e9, 2.92e9, 101).frequencies();
        assert_eq!(values.len(), 101);
        assert_eq!(values[0], 2.82e9);
        assert_eq!(values[100], 2.92e9);
        assert!((values[50] - 2.87e9).abs() < 1e-3);
    }

    #[test]
    fn test_range_check() {
        assert!(FrequencyRange::new(1e9, 2e9, 2).check("r").is_ok());
        assert!(FrequencyRange::new(1e9, 1e9, 10).check("r").is_err());
        assert!(FrequencyRange::new(1e9, 2e9, 1).check("r").is_err());
        assert!(FrequencyRange::new(f64::NAN, 2e9, 10).check("r").is_err());
    }

    #[test]
    fn test_sequence_mode_and_len() {
        let sweep = SampleSequence::Linear {
            start: 1.0,
            stop: 2.0,
            points: 5,
        };
        assert_eq!(sweep.mode(), ScanMode::EquidistantSweep);
        assert_eq!(sweep.len(), 5);
        assert_eq!(sweep.values(), vec![1.0, 1.25, 1.5, 1.75, 2.0]);

        let list = SampleSequence::Explicit(vec![3.0, 1.0]);
        assert_eq!(list.mode(), ScanMode::JumpList);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_parameters_derived_values() {
        let params = ScanParameters {
            frequency_ranges: vec![
                FrequencyRange::new(1e9, 2e9, 10),
                FrequencyRange::new(3e9, 4e9, 5),
            ],
            scan_power: -10.0,
            data_rate: 200.0,
            oversampling_factor: 3,
            run_time: 60.0,
            scans_to_average: 0,
        };
        assert_eq!(params.points_per_line(), 15);
        assert_eq!(params.sample_rate(), 600.0);
    }
}
