//! ScanBlueprint - Config Loader output
//!
//! Persisted session defaults, engine options, dummy device descriptions and
//! output routing. Loaded once at startup and written back at shutdown.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use validator::Validate;

use crate::{CwParameters, FrequencyRange, Limits, ScanMode, ScanParameters};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete scan configuration blueprint
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ScanBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Session values recalled from the last run
    #[serde(default)]
    #[validate(nested)]
    pub scan: ScanDefaults,

    /// Engine options
    #[serde(default)]
    pub engine: EngineConfig,

    /// Simulated microwave source
    #[serde(default)]
    #[validate(nested)]
    pub microwave: MicrowaveConfig,

    /// Simulated finite sampling device
    #[serde(default)]
    #[validate(nested)]
    pub sampler: SamplerConfig,

    /// Output routing
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

/// Persisted scan session values
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScanDefaults {
    /// Frequency ranges, scanned in order
    #[serde(default = "default_frequency_ranges")]
    #[validate(length(min = 1))]
    pub frequency_ranges: Vec<FrequencyRange>,

    /// CW frequency (Hz)
    #[serde(default = "default_cw_frequency")]
    #[validate(range(exclusive_min = 0.0))]
    pub cw_frequency: f64,

    /// CW power (dBm)
    #[serde(default = "default_power")]
    pub cw_power: f64,

    /// Scan power (dBm)
    #[serde(default = "default_power")]
    pub scan_power: f64,

    /// Scan duration (s)
    #[serde(default = "default_run_time")]
    #[validate(range(exclusive_min = 0.0))]
    pub run_time: f64,

    /// Lines entering the signal average, 0 = all
    #[serde(default)]
    pub scans_to_average: usize,

    /// Logical bins per second (Hz)
    #[serde(default = "default_data_rate")]
    #[validate(range(exclusive_min = 0.0))]
    pub data_rate: f64,

    /// Raw samples per bin
    #[serde(default = "default_oversampling")]
    #[validate(range(min = 1))]
    pub oversampling_factor: usize,
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            frequency_ranges: default_frequency_ranges(),
            cw_frequency: default_cw_frequency(),
            cw_power: default_power(),
            scan_power: default_power(),
            run_time: default_run_time(),
            scans_to_average: 0,
            data_rate: default_data_rate(),
            oversampling_factor: default_oversampling(),
        }
    }
}

fn default_frequency_ranges() -> Vec<FrequencyRange> {
    vec![FrequencyRange::default()]
}

fn default_cw_frequency() -> f64 {
    2870e6
}

fn default_power() -> f64 {
    -30.0
}

fn default_run_time() -> f64 {
    60.0
}

fn default_data_rate() -> f64 {
    200.0
}

fn default_oversampling() -> usize {
    1
}

/// Engine options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Mode used for single-range scans; multiple ranges always use a jump list
    #[serde(default = "default_scan_mode")]
    pub default_scan_mode: ScanMode,

    /// Directory for saved scan data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_scan_mode: default_scan_mode(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_scan_mode() -> ScanMode {
    ScanMode::JumpList
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./odmr_data")
}

/// Simulated microwave source
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MicrowaveConfig {
    /// Device name
    #[serde(default = "default_microwave_name")]
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default = "default_mw_frequency_limits")]
    pub frequency_limits: Limits<f64>,

    #[serde(default = "default_mw_power_limits")]
    pub power_limits: Limits<f64>,

    #[serde(default = "default_mw_scan_size_limits")]
    pub scan_size_limits: Limits<usize>,

    /// Trigger rate limits (Hz)
    #[serde(default = "default_mw_sample_rate_limits")]
    pub sample_rate_limits: Limits<f64>,

    #[serde(default = "default_supported_modes")]
    pub supported_scan_modes: BTreeSet<ScanMode>,

    /// Simulated output switching time (ms)
    #[serde(default)]
    pub switch_delay_ms: u64,
}

impl Default for MicrowaveConfig {
    fn default() -> Self {
        Self {
            name: default_microwave_name(),
            frequency_limits: default_mw_frequency_limits(),
            power_limits: default_mw_power_limits(),
            scan_size_limits: default_mw_scan_size_limits(),
            sample_rate_limits: default_mw_sample_rate_limits(),
            supported_scan_modes: default_supported_modes(),
            switch_delay_ms: 0,
        }
    }
}

fn default_microwave_name() -> String {
    "microwave".to_string()
}

fn default_mw_frequency_limits() -> Limits<f64> {
    Limits {
        min: 100e3,
        max: 20e9,
    }
}

fn default_mw_power_limits() -> Limits<f64> {
    Limits {
        min: -120.0,
        max: 30.0,
    }
}

fn default_mw_scan_size_limits() -> Limits<usize> {
    Limits { min: 2, max: 10001 }
}

fn default_mw_sample_rate_limits() -> Limits<f64> {
    Limits {
        min: 0.1,
        max: 1e6,
    }
}

fn default_supported_modes() -> BTreeSet<ScanMode> {
    [ScanMode::JumpList, ScanMode::EquidistantSweep]
        .into_iter()
        .collect()
}

/// Shape of the simulated sampler data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    /// Lorentzian dip on a noisy baseline
    #[default]
    Odmr,
    /// Uniform random samples
    Random,
}

/// Simulated finite sampling device
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SamplerConfig {
    /// Device name
    #[serde(default = "default_sampler_name")]
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default = "default_sampler_rate_limits")]
    pub sample_rate_limits: Limits<f64>,

    #[serde(default = "default_frame_size_limits")]
    pub frame_size_limits: Limits<usize>,

    /// Input channel -> unit
    #[serde(default = "default_input_channels")]
    #[validate(length(min = 1))]
    pub input_channel_units: BTreeMap<String, String>,

    /// Output channel -> unit
    #[serde(default = "default_output_channels")]
    pub output_channel_units: BTreeMap<String, String>,

    #[serde(default = "default_supported_modes")]
    pub supported_output_modes: BTreeSet<ScanMode>,

    #[serde(default)]
    pub simulation: SimulationMode,

    /// Frame timeout as a multiple of the expected frame duration
    #[serde(default = "default_timeout_factor")]
    #[validate(range(min = 1.0))]
    pub timeout_factor: f64,

    /// RNG seed for reproducible data
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            name: default_sampler_name(),
            sample_rate_limits: default_sampler_rate_limits(),
            frame_size_limits: default_frame_size_limits(),
            input_channel_units: default_input_channels(),
            output_channel_units: default_output_channels(),
            supported_output_modes: default_supported_modes(),
            simulation: SimulationMode::default(),
            timeout_factor: default_timeout_factor(),
            seed: None,
        }
    }
}

fn default_sampler_name() -> String {
    "sampler".to_string()
}

fn default_sampler_rate_limits() -> Limits<f64> {
    Limits { min: 1.0, max: 1e6 }
}

fn default_frame_size_limits() -> Limits<usize> {
    Limits {
        min: 1,
        max: 1_000_000_000,
    }
}

fn default_input_channels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("APD counts".to_string(), "c/s".to_string()),
        ("Photodiode".to_string(), "V".to_string()),
    ])
}

fn default_output_channels() -> BTreeMap<String, String> {
    BTreeMap::from([("Frequency".to_string(), "Hz".to_string())])
}

fn default_timeout_factor() -> f64 {
    2.0
}

/// Sink output config
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink name
    #[validate(length(min = 1))]
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Type specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log output
    Log,
    /// File output
    File,
}

impl ScanBlueprint {
    /// Scan settings recalled from the last session
    pub fn scan_parameters(&self) -> ScanParameters {
        ScanParameters {
            frequency_ranges: self.scan.frequency_ranges.clone(),
            scan_power: self.scan.scan_power,
            data_rate: self.scan.data_rate,
            oversampling_factor: self.scan.oversampling_factor,
            run_time: self.scan.run_time,
            scans_to_average: self.scan.scans_to_average,
        }
    }

    pub fn cw_parameters(&self) -> CwParameters {
        CwParameters {
            frequency: self.scan.cw_frequency,
            power: self.scan.cw_power,
        }
    }

    /// Store the final session values for the next start
    pub fn record_session(&mut self, params: &ScanParameters, cw: CwParameters) {
        self.scan = ScanDefaults {
            frequency_ranges: params.frequency_ranges.clone(),
            cw_frequency: cw.frequency,
            cw_power: cw.power,
            scan_power: params.scan_power,
            run_time: params.run_time,
            scans_to_average: params.scans_to_average,
            data_rate: params.data_rate,
            oversampling_factor: params.oversampling_factor,
        };
    }
}
