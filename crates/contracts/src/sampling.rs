//! FiniteSamplingIo trait - frame-based synchronized sampler
//!
//! Acquires a fixed number of samples per active input channel, clocked by an
//! internal sample clock, while optionally driving output channels.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{ContractError, Limits, SampleSequence, ScanMode};

/// One acquired frame: input channel name -> samples
pub type ChannelFrame = BTreeMap<String, Vec<f64>>;

/// Hardware limits of a sampling device. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConstraints {
    frame_size_limits: Limits<usize>,
    sample_rate_limits: Limits<f64>,
    input_channel_units: BTreeMap<String, String>,
    output_channel_units: BTreeMap<String, String>,
    supported_output_modes: BTreeSet<ScanMode>,
}

impl SamplingConstraints {
    /// # Errors
    /// `Configuration` if a limit pair is inverted, the minimum sample rate is not
    /// positive, there are no input channels or a channel name is blank
    pub fn new(
        frame_size_limits: Limits<usize>,
        sample_rate_limits: Limits<f64>,
        input_channel_units: BTreeMap<String, String>,
        output_channel_units: BTreeMap<String, String>,
        supported_output_modes: BTreeSet<ScanMode>,
    ) -> Result<Self, ContractError> {
        frame_size_limits.check("frame_size_limits")?;
        sample_rate_limits.check("sample_rate_limits")?;
        if sample_rate_limits.min() <= 0.0 {
            return Err(ContractError::configuration(
                "sample_rate_limits",
                "minimum sample rate must be positive",
            ));
        }
        if frame_size_limits.min() == 0 {
            return Err(ContractError::configuration(
                "frame_size_limits",
                "minimum frame size must be at least 1",
            ));
        }
        if input_channel_units.is_empty() {
            return Err(ContractError::configuration(
                "input_channel_units",
                "at least one input channel is required",
            ));
        }
        let names = input_channel_units.keys().chain(output_channel_units.keys());
        for name in names {
            if name.trim().is_empty() {
                return Err(ContractError::configuration(
                    "channel_units",
                    "channel names must not be blank",
                ));
            }
        }
        Ok(Self {
            frame_size_limits,
            sample_rate_limits,
            input_channel_units,
            output_channel_units,
            supported_output_modes,
        })
    }

    pub fn frame_size_limits(&self) -> Limits<usize> {
        self.frame_size_limits
    }

    pub fn sample_rate_limits(&self) -> Limits<f64> {
        self.sample_rate_limits
    }

    pub fn input_channel_units(&self) -> &BTreeMap<String, String> {
        &self.input_channel_units
    }

    pub fn output_channel_units(&self) -> &BTreeMap<String, String> {
        &self.output_channel_units
    }

    pub fn supported_output_modes(&self) -> &BTreeSet<ScanMode> {
        &self.supported_output_modes
    }

    pub fn input_channel_names(&self) -> impl Iterator<Item = &str> {
        self.input_channel_units.keys().map(String::as_str)
    }

    /// Unit of an input channel, `None` for unknown channels
    pub fn input_unit(&self, channel: &str) -> Option<&str> {
        self.input_channel_units.get(channel).map(String::as_str)
    }
}

/// Finite sampling device contract
///
/// Methods take `&self`; implementations guard their own state.
#[trait_variant::make(FiniteSamplingIo: Send)]
pub trait LocalFiniteSamplingIo {
    /// Device name (used for logging/errors)
    fn name(&self) -> &str;

    fn constraints(&self) -> &SamplingConstraints;

    /// Currently configured sample rate (Hz)
    fn sample_rate(&self) -> f64;

    /// Currently configured samples per frame
    fn frame_size(&self) -> usize;

    fn active_input_channels(&self) -> Vec<String>;

    fn active_output_channels(&self) -> Vec<String>;

    /// A buffered frame is being acquired
    fn is_running(&self) -> bool;

    /// # Errors
    /// `Configuration` if running or the rate is out of range
    async fn set_sample_rate(&self, rate: f64) -> Result<(), ContractError>;

    /// # Errors
    /// `Configuration` if running or a channel is unknown
    async fn set_active_channels(
        &self,
        inputs: &[String],
        outputs: &[String],
    ) -> Result<(), ContractError>;

    /// # Errors
    /// `Configuration` if running or the size is out of range
    async fn set_frame_size(&self, size: usize) -> Result<(), ContractError>;

    /// Set the output data for every active output channel. The frame size
    /// follows the sequence length.
    ///
    /// # Errors
    /// `Configuration` if running, lengths differ or a channel is not active
    async fn set_frame_data(
        &self,
        data: &BTreeMap<String, SampleSequence>,
    ) -> Result<(), ContractError>;

    /// Arm the sample clock for one frame of `frame_size` samples
    ///
    /// # Errors
    /// `HardwareState` if already running
    async fn start_buffered_frame(&self) -> Result<(), ContractError>;

    /// Abort or finish the current frame. Never fails when idle.
    async fn stop_buffered_frame(&self) -> Result<(), ContractError>;

    /// Samples acquired but not read yet (per channel)
    fn samples_in_buffer(&self) -> usize;

    /// Read `count` samples per channel, waiting until they are available
    ///
    /// # Errors
    /// `Configuration` if `count` exceeds the samples left in the frame,
    /// `AcquisitionTimeout` if the hardware stalls
    async fn get_buffered_samples(&self, count: usize) -> Result<ChannelFrame, ContractError>;

    /// Acquire exactly `frame_size` samples per active input channel and
    /// return only once the full frame is available
    ///
    /// # Errors
    /// `AcquisitionTimeout` if the frame does not complete in time
    async fn acquire_frame(&self, frame_size: usize) -> Result<ChannelFrame, ContractError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_constraints_require_inputs() {
        let err = SamplingConstraints::new(
            Limits::new(1, 1_000_000).unwrap(),
            Limits::new(1.0, 1e6).unwrap(),
            BTreeMap::new(),
            units(&[("Frequency", "Hz")]),
            BTreeSet::new(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_constraints_reject_zero_rate() {
        let result = SamplingConstraints::new(
            Limits::new(1, 1_000_000).unwrap(),
            Limits::new(0.0, 1e6).unwrap(),
            units(&[("APD counts", "c/s")]),
            BTreeMap::new(),
            BTreeSet::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_input_units_lookup() {
        let c = SamplingConstraints::new(
            Limits::new(1, 1_000_000).unwrap(),
            Limits::new(1.0, 1e6).unwrap(),
            units(&[("APD counts", "c/s"), ("Photodiode", "V")]),
            BTreeMap::new(),
            [ScanMode::JumpList].into_iter().collect(),
        )
        .unwrap();
        assert_eq!(c.input_unit("Photodiode"), Some("V"));
        assert_eq!(c.input_unit("missing"), None);
        assert_eq!(c.input_channel_names().count(), 2);
    }
}
