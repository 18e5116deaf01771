//! ScanSnapshot - scan engine output
//!
//! Observers only ever see these copies; the buffers stay inside the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{FrequencyRange, ScanParameters, ScanState};

/// Per-channel data split by frequency range: channel -> range -> values
pub type RangeData = BTreeMap<String, Vec<Vec<f64>>>;

/// State published after every transition and every acquired line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSnapshot {
    /// Publish sequence number (monotonically increasing)
    pub sequence: u64,

    pub state: ScanState,

    /// Lines pushed since the scan started or data was cleared
    pub elapsed_lines: u64,

    /// Scan time (seconds), excluding paused intervals
    pub elapsed_time: f64,

    /// Line capacity of the frame buffer
    pub buffer_capacity: usize,

    /// Frequency axis per range (Hz)
    pub frequency_data: Vec<Vec<f64>>,

    /// Averaged signal: channel -> range -> per-bin mean
    pub signal_data: RangeData,

    /// Unit per channel
    pub channel_units: BTreeMap<String, String>,

    /// Wall time of the most recent line (seconds)
    pub last_line_duration: Option<f64>,

    /// Error that stopped the last scan, cleared by the next start
    pub failure: Option<String>,
}

impl ScanSnapshot {
    pub fn is_running(&self) -> bool {
        self.state == ScanState::Scanning
    }

    pub fn is_paused(&self) -> bool {
        self.state == ScanState::Paused
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Mid-scan update that a newer one fully supersedes
    pub fn is_progress(&self) -> bool {
        self.is_running() && !self.has_failed()
    }
}

/// Settings a finished scan was recorded with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub frequency_ranges: Vec<FrequencyRange>,
    pub scan_power: f64,
    pub cw_frequency: f64,
    pub cw_power: f64,
    pub run_time: f64,
    pub elapsed_time: f64,
    pub elapsed_lines: u64,
    pub data_rate: f64,
    pub oversampling_factor: usize,
    pub scans_to_average: usize,
}

impl ScanMetadata {
    pub fn from_parameters(
        params: &ScanParameters,
        cw_frequency: f64,
        cw_power: f64,
        elapsed_time: f64,
        elapsed_lines: u64,
    ) -> Self {
        Self {
            frequency_ranges: params.frequency_ranges.clone(),
            scan_power: params.scan_power,
            cw_frequency,
            cw_power,
            run_time: params.run_time,
            elapsed_time,
            elapsed_lines,
            data_rate: params.data_rate,
            oversampling_factor: params.oversampling_factor,
            scans_to_average: params.scans_to_average,
        }
    }
}

/// Complete dataset of one scan, as exported to storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub metadata: ScanMetadata,

    pub channel_units: BTreeMap<String, String>,

    /// Frequency axis per range (Hz)
    pub frequency_data: Vec<Vec<f64>>,

    /// channel -> range -> per-bin mean
    pub signal_data: RangeData,

    /// channel -> range -> bin -> lines, newest line first, trimmed to `elapsed_lines`
    pub raw_data: BTreeMap<String, Vec<Vec<Vec<f64>>>>,
}
