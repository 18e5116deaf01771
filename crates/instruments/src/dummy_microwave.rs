//! Simulated microwave source
//!
//! Implements `MicrowaveDevice` with the CW / LIST / SWEEP output state machine of a
//! real source. Switching the output takes `switch_delay`; failures can be injected
//! per call for testing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use contracts::{
    ContractError, CwParameters, MicrowaveDevice, MicrowaveMode, SampleSequence, ScanConstraints,
    ScanMode,
};
use tracing::{debug, instrument, warn};

use crate::fault::{lock, FaultSet};

/// Calls that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrowaveFault {
    Configure,
    Start,
    Reset,
    Off,
}

/// Dummy microwave configuration
#[derive(Debug, Clone)]
pub struct DummyMicrowaveConfig {
    /// Device name
    pub name: String,
    /// Hardware limits
    pub constraints: ScanConstraints,
    /// Time the output needs to switch on or off
    pub switch_delay: Duration,
}

/// Number of calls received, per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MicrowaveCallCounts {
    pub configure: u64,
    pub start: u64,
    pub reset: u64,
    pub off: u64,
}

#[derive(Debug)]
struct OutputState {
    mode: Option<MicrowaveMode>,
    cw: CwParameters,
    scan_power: f64,
    scan_frequencies: Option<SampleSequence>,
    scan_mode: ScanMode,
    scan_sample_rate: f64,
}

/// Simulated microwave source
pub struct DummyMicrowave {
    name: String,
    constraints: ScanConstraints,
    switch_delay: Duration,
    state: Mutex<OutputState>,
    faults: FaultSet<MicrowaveFault>,
    configure_calls: AtomicU64,
    start_calls: AtomicU64,
    reset_calls: AtomicU64,
    off_calls: AtomicU64,
}

impl DummyMicrowave {
    pub fn new(config: DummyMicrowaveConfig) -> Self {
        let frequency_limits = config.constraints.frequency_limits();
        let power_limits = config.constraints.power_limits();
        Self {
            name: config.name,
            switch_delay: config.switch_delay,
            state: Mutex::new(OutputState {
                mode: None,
                cw: CwParameters {
                    frequency: frequency_limits.clip(2.87e9),
                    power: power_limits.min(),
                },
                scan_power: power_limits.min(),
                scan_frequencies: None,
                scan_mode: ScanMode::JumpList,
                scan_sample_rate: config.constraints.sample_rate_limits().min(),
            }),
            constraints: config.constraints,
            faults: FaultSet::new(),
            configure_calls: AtomicU64::new(0),
            start_calls: AtomicU64::new(0),
            reset_calls: AtomicU64::new(0),
            off_calls: AtomicU64::new(0),
        }
    }

    /// Make the next call of the given kind fail with a device error
    pub fn inject_fault(&self, fault: MicrowaveFault) {
        self.faults.arm(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn call_counts(&self) -> MicrowaveCallCounts {
        MicrowaveCallCounts {
            configure: self.configure_calls.load(Ordering::Relaxed),
            start: self.start_calls.load(Ordering::Relaxed),
            reset: self.reset_calls.load(Ordering::Relaxed),
            off: self.off_calls.load(Ordering::Relaxed),
        }
    }

    /// Scan mode of the configured scan
    pub fn scan_mode(&self) -> ScanMode {
        lock(&self.state).scan_mode
    }

    fn check_fault(&self, fault: MicrowaveFault) -> Result<(), ContractError> {
        if self.faults.take(fault) {
            warn!(device = %self.name, ?fault, "Injected fault");
            return Err(ContractError::device(
                &self.name,
                format!("injected {fault:?} failure"),
            ));
        }
        Ok(())
    }

    async fn switch(&self) {
        if !self.switch_delay.is_zero() {
            tokio::time::sleep(self.switch_delay).await;
        }
    }
}

impl MicrowaveDevice for DummyMicrowave {
    fn name(&self) -> &str {
        &self.name
    }

    fn constraints(&self) -> &ScanConstraints {
        &self.constraints
    }

    fn output_mode(&self) -> Option<MicrowaveMode> {
        lock(&self.state).mode
    }

    fn is_scanning(&self) -> bool {
        matches!(
            lock(&self.state).mode,
            Some(MicrowaveMode::List | MicrowaveMode::Sweep)
        )
    }

    fn scan_power(&self) -> f64 {
        lock(&self.state).scan_power
    }

    fn scan_frequencies(&self) -> Option<SampleSequence> {
        lock(&self.state).scan_frequencies.clone()
    }

    fn scan_sample_rate(&self) -> f64 {
        lock(&self.state).scan_sample_rate
    }

    fn cw_parameters(&self) -> CwParameters {
        lock(&self.state).cw
    }

    #[instrument(name = "dummy_mw_set_cw", skip(self), fields(device = %self.name))]
    async fn set_cw(&self, frequency: f64, power: f64) -> Result<CwParameters, ContractError> {
        let mut state = lock(&self.state);
        if state.mode == Some(MicrowaveMode::Cw) {
            return Err(ContractError::hardware_state(
                &self.name,
                "unable to change CW parameters while CW output is active",
            ));
        }
        let frequency = self
            .constraints
            .frequency_limits()
            .require("frequency", frequency)?;
        let power = self.constraints.power_limits().require("power", power)?;
        state.cw = CwParameters { frequency, power };
        Ok(state.cw)
    }

    #[instrument(name = "dummy_mw_cw_on", skip(self), fields(device = %self.name))]
    async fn cw_on(&self) -> Result<(), ContractError> {
        let current = lock(&self.state).mode;
        match current {
            Some(MicrowaveMode::Cw) => return Ok(()),
            Some(mode) => {
                return Err(ContractError::hardware_state(
                    &self.name,
                    format!("unable to switch on CW, {mode:?} output is active"),
                ))
            }
            None => {}
        }
        self.switch().await;
        lock(&self.state).mode = Some(MicrowaveMode::Cw);
        debug!(device = %self.name, "CW output on");
        Ok(())
    }

    #[instrument(
        name = "dummy_mw_configure_scan",
        skip(self, frequencies),
        fields(device = %self.name, points = frequencies.len())
    )]
    async fn configure_scan(
        &self,
        power: f64,
        frequencies: &SampleSequence,
        mode: ScanMode,
        sample_rate: f64,
    ) -> Result<(), ContractError> {
        self.configure_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = lock(&self.state);
        if let Some(active) = state.mode {
            return Err(ContractError::hardware_state(
                &self.name,
                format!("unable to configure scan while {active:?} output is active"),
            ));
        }
        self.check_fault(MicrowaveFault::Configure)?;
        self.constraints
            .check_scan(power, frequencies, mode, sample_rate)?;

        state.scan_power = power;
        state.scan_frequencies = Some(frequencies.clone());
        state.scan_mode = mode;
        state.scan_sample_rate = sample_rate;
        Ok(())
    }

    #[instrument(name = "dummy_mw_start_scan", skip(self), fields(device = %self.name))]
    async fn start_scan(&self) -> Result<(), ContractError> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        let mode = {
            let state = lock(&self.state);
            match state.mode {
                Some(MicrowaveMode::Cw) => {
                    return Err(ContractError::hardware_state(
                        &self.name,
                        "unable to start scan while CW output is active",
                    ))
                }
                Some(_) => {
                    return Err(ContractError::hardware_state(
                        &self.name,
                        "scan output is already active",
                    ))
                }
                None if state.scan_frequencies.is_none() => {
                    return Err(ContractError::hardware_state(
                        &self.name,
                        "no scan has been configured",
                    ))
                }
                None => MicrowaveMode::from(state.scan_mode),
            }
        };
        self.check_fault(MicrowaveFault::Start)?;

        // returns only once the output is on
        self.switch().await;
        lock(&self.state).mode = Some(mode);
        debug!(device = %self.name, ?mode, "Scan output on");
        Ok(())
    }

    async fn reset_scan(&self) -> Result<(), ContractError> {
        self.reset_calls.fetch_add(1, Ordering::Relaxed);
        match lock(&self.state).mode {
            Some(MicrowaveMode::List | MicrowaveMode::Sweep) => {}
            Some(MicrowaveMode::Cw) => {
                return Err(ContractError::invalid_state("reset scan", "CW output is active"))
            }
            None => return Err(ContractError::invalid_state("reset scan", "output is off")),
        }
        self.check_fault(MicrowaveFault::Reset)
    }

    #[instrument(name = "dummy_mw_off", skip(self), fields(device = %self.name))]
    async fn off(&self) -> Result<(), ContractError> {
        self.off_calls.fetch_add(1, Ordering::Relaxed);
        self.check_fault(MicrowaveFault::Off)?;
        let current = lock(&self.state).mode;
        if current.is_none() {
            return Ok(());
        }
        self.switch().await;
        lock(&self.state).mode = None;
        debug!(device = %self.name, "Output off");
        Ok(())
    }
}
