//! Limits shared by the microwave source and the sampler

use contracts::{ContractError, FrequencyRange, Limits, ScanConstraints, ScanMode, ScanParameters, SamplingConstraints};

/// Intersection of what both devices accept
#[derive(Debug, Clone)]
pub struct ScanLimits {
    pub frequency: Limits<f64>,
    pub power: Limits<f64>,
    /// Hardware samples per line (`points * oversampling`)
    pub scan_size: Limits<usize>,
    /// Hardware sample rate (`data_rate * oversampling`)
    pub sample_rate: Limits<f64>,
    pub supports_jump_list: bool,
}

impl ScanLimits {
    /// # Errors
    /// `Configuration` if the two devices share no scan size or sample rate
    pub fn combine(
        microwave: &ScanConstraints,
        sampler: &SamplingConstraints,
    ) -> Result<Self, ContractError> {
        Ok(Self {
            frequency: microwave.frequency_limits(),
            power: microwave.power_limits(),
            scan_size: microwave
                .scan_size_limits()
                .intersect(&sampler.frame_size_limits(), "scan_size")?,
            sample_rate: microwave
                .sample_rate_limits()
                .intersect(&sampler.sample_rate_limits(), "sample_rate")?,
            supports_jump_list: microwave.supports(ScanMode::JumpList),
        })
    }

    /// Frequency ranges as one scan line
    pub fn check_ranges(&self, ranges: &[FrequencyRange]) -> Result<(), ContractError> {
        if ranges.is_empty() {
            return Err(ContractError::configuration(
                "frequency_ranges",
                "at least one range is required",
            ));
        }
        if ranges.len() > 1 && !self.supports_jump_list {
            return Err(ContractError::configuration(
                "frequency_ranges",
                "multiple ranges need jump list support",
            ));
        }
        for (i, range) in ranges.iter().enumerate() {
            let field = format!("frequency_ranges[{i}]");
            range.check(&field)?;
            for edge in [range.start, range.stop] {
                if !self.frequency.contains(edge) {
                    return Err(ContractError::configuration(
                        field,
                        format!("{edge} Hz is outside of {}", self.frequency),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Rate and line size for `ranges` at the given rate settings
    pub fn check_rates(
        &self,
        ranges: &[FrequencyRange],
        data_rate: f64,
        oversampling_factor: usize,
    ) -> Result<(), ContractError> {
        if !(data_rate.is_finite() && data_rate > 0.0) {
            return Err(ContractError::configuration(
                "data_rate",
                format!("{data_rate} must be a positive number"),
            ));
        }
        if oversampling_factor == 0 {
            return Err(ContractError::configuration(
                "oversampling_factor",
                "must be at least 1",
            ));
        }
        self.sample_rate
            .require("sample_rate", data_rate * oversampling_factor as f64)?;
        let points: usize = ranges.iter().map(|r| r.points).sum();
        self.scan_size
            .require("scan_size", points.saturating_mul(oversampling_factor))?;
        Ok(())
    }

    /// A sweep steps once per bin on the hardware clock, so oversampled
    /// samples would run past the end of the sweep
    pub fn check_mode(&self, mode: ScanMode, oversampling_factor: usize) -> Result<(), ContractError> {
        if mode == ScanMode::EquidistantSweep && oversampling_factor > 1 {
            return Err(ContractError::configuration(
                "oversampling_factor",
                format!("{oversampling_factor} is not supported by {mode}, use 1 or a jump list"),
            ));
        }
        Ok(())
    }

    /// Everything a scan start depends on
    pub fn check(&self, params: &ScanParameters) -> Result<(), ContractError> {
        self.check_ranges(&params.frequency_ranges)?;
        self.check_rates(
            &params.frequency_ranges,
            params.data_rate,
            params.oversampling_factor,
        )?;
        self.power.require("scan_power", params.scan_power)?;
        if !(params.run_time.is_finite() && params.run_time > 0.0) {
            return Err(ContractError::configuration(
                "run_time",
                format!("{} must be a positive number of seconds", params.run_time),
            ));
        }
        Ok(())
    }
}
