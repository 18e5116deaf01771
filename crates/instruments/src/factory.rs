//! DeviceFactory
//!
//! Builds the simulated devices described by a `ScanBlueprint`.

use std::time::Duration;

use contracts::{
    ContractError, MicrowaveConfig, SamplerConfig, SamplingConstraints, ScanBlueprint,
    ScanConstraints,
};
use tracing::{info, instrument};

use crate::dummy_microwave::{DummyMicrowave, DummyMicrowaveConfig};
use crate::dummy_sampler::{DummySampler, DummySamplerConfig};

/// Slack added to every simulated frame timeout
const DEFAULT_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Device pair driven by one scan engine
pub struct DevicePair {
    pub microwave: DummyMicrowave,
    pub sampler: DummySampler,
}

/// Device factory
///
/// Devices are picked at startup from configuration; the engine only sees their traits.
pub struct DeviceFactory;

impl DeviceFactory {
    /// Build both devices
    ///
    /// # Errors
    /// `Configuration` if a device section describes impossible limits
    #[instrument(name = "device_factory_build", skip(blueprint))]
    pub fn from_blueprint(blueprint: &ScanBlueprint) -> Result<DevicePair, ContractError> {
        let microwave = Self::microwave(&blueprint.microwave)?;
        let sampler = Self::sampler(&blueprint.sampler)?;
        info!(
            microwave = %blueprint.microwave.name,
            sampler = %blueprint.sampler.name,
            channels = blueprint.sampler.input_channel_units.len(),
            "devices created"
        );
        Ok(DevicePair { microwave, sampler })
    }

    pub fn microwave(config: &MicrowaveConfig) -> Result<DummyMicrowave, ContractError> {
        Ok(DummyMicrowave::new(Self::microwave_config(config)?))
    }

    pub fn sampler(config: &SamplerConfig) -> Result<DummySampler, ContractError> {
        Ok(DummySampler::new(Self::sampler_config(config)?))
    }

    pub fn microwave_config(config: &MicrowaveConfig) -> Result<DummyMicrowaveConfig, ContractError> {
        let constraints = ScanConstraints::new(
            config.frequency_limits,
            config.power_limits,
            config.scan_size_limits,
            config.sample_rate_limits,
            config.supported_scan_modes.clone(),
        )?;
        Ok(DummyMicrowaveConfig {
            name: config.name.clone(),
            constraints,
            switch_delay: Duration::from_millis(config.switch_delay_ms),
        })
    }

    pub fn sampler_config(config: &SamplerConfig) -> Result<DummySamplerConfig, ContractError> {
        let constraints = SamplingConstraints::new(
            config.frame_size_limits,
            config.sample_rate_limits,
            config.input_channel_units.clone(),
            config.output_channel_units.clone(),
            config.supported_output_modes.clone(),
        )?;
        Ok(DummySamplerConfig {
            name: config.name.clone(),
            constraints,
            simulation: config.simulation,
            timeout_factor: config.timeout_factor,
            timeout_margin: DEFAULT_TIMEOUT_MARGIN,
            seed: config.seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FiniteSamplingIo, MicrowaveDevice, ScanMode};

    #[test]
    fn test_default_blueprint_builds_devices() {
        let pair = DeviceFactory::from_blueprint(&ScanBlueprint::default()).unwrap();
        assert_eq!(pair.microwave.name(), "microwave");
        assert!(pair.microwave.constraints().supports(ScanMode::JumpList));
        assert_eq!(pair.sampler.active_input_channels().len(), 2);
        assert_eq!(
            pair.sampler.constraints().input_unit("APD counts"),
            Some("c/s")
        );
    }

    #[test]
    fn test_impossible_limits_rejected() {
        let mut bp = ScanBlueprint::default();
        bp.sampler.input_channel_units.clear();
        assert!(DeviceFactory::from_blueprint(&bp).is_err());

        let mut bp = ScanBlueprint::default();
        bp.microwave.supported_scan_modes.clear();
        assert!(DeviceFactory::from_blueprint(&bp)
            .err()
            .is_some_and(|e| e.is_configuration()));
    }
}
