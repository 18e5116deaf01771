//! Simulated finite sampling device
//!
//! Implements `FiniteSamplingIo`. A frame is simulated in full when it is started and
//! handed out as the virtual sample clock advances (`frame_size / sample_rate` seconds
//! per frame). Samples are either a noisy Lorentzian ODMR dip or uniform noise.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use contracts::{
    ChannelFrame, ContractError, FiniteSamplingIo, SampleSequence, SamplingConstraints,
    SimulationMode,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::fault::{lock, FaultSet};

/// Acquisition faults that can be injected once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerFault {
    /// The next frame never completes and times out
    Stall,
    /// The next frame start fails
    Fail,
}

/// Dummy sampler configuration
#[derive(Debug, Clone)]
pub struct DummySamplerConfig {
    /// Device name
    pub name: String,
    /// Hardware limits
    pub constraints: SamplingConstraints,
    /// Simulated data shape
    pub simulation: SimulationMode,
    /// Timeout as a multiple of the expected frame duration
    pub timeout_factor: f64,
    /// Fixed slack added to every timeout
    pub timeout_margin: Duration,
    /// RNG seed
    pub seed: Option<u64>,
}

#[derive(Debug)]
struct FrameState {
    sample_rate: f64,
    frame_size: usize,
    active_inputs: Vec<String>,
    active_outputs: Vec<String>,
    output_data: Option<BTreeMap<String, SampleSequence>>,
    started_at: Option<Instant>,
    stalled: bool,
    samples: ChannelFrame,
    returned: usize,
    rng: StdRng,
}

impl FrameState {
    /// Samples the virtual clock has produced so far in this frame
    fn acquired(&self) -> usize {
        match self.started_at {
            Some(_) if self.stalled => 0,
            Some(started) => {
                let elapsed = started.elapsed().as_secs_f64();
                ((elapsed * self.sample_rate) as usize).min(self.frame_size)
            }
            None => 0,
        }
    }
}

/// Simulated finite sampling device
pub struct DummySampler {
    name: String,
    constraints: SamplingConstraints,
    simulation: SimulationMode,
    timeout_factor: f64,
    timeout_margin: Duration,
    state: Mutex<FrameState>,
    faults: FaultSet<SamplerFault>,
    frames: AtomicU64,
}

impl DummySampler {
    pub fn new(config: DummySamplerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let active_inputs = config
            .constraints
            .input_channel_names()
            .map(str::to_string)
            .collect();
        Self {
            name: config.name,
            simulation: config.simulation,
            timeout_factor: config.timeout_factor.max(1.0),
            timeout_margin: config.timeout_margin,
            state: Mutex::new(FrameState {
                sample_rate: config.constraints.sample_rate_limits().min(),
                frame_size: config.constraints.frame_size_limits().min(),
                active_inputs,
                active_outputs: Vec::new(),
                output_data: None,
                started_at: None,
                stalled: false,
                samples: ChannelFrame::new(),
                returned: 0,
                rng,
            }),
            constraints: config.constraints,
            faults: FaultSet::new(),
            frames: AtomicU64::new(0),
        }
    }

    /// Arm a fault for the next frame
    pub fn inject_fault(&self, fault: SamplerFault) {
        self.faults.arm(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Frames started so far
    pub fn frames_started(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Output data last set with `set_frame_data`
    pub fn output_data(&self) -> Option<BTreeMap<String, SampleSequence>> {
        lock(&self.state).output_data.clone()
    }

    /// Expected duration of a frame plus slack
    fn timeout_budget(&self, frame_size: usize, sample_rate: f64) -> Duration {
        let expected = frame_size as f64 / sample_rate;
        Duration::from_secs_f64(expected * self.timeout_factor) + self.timeout_margin
    }

    fn ensure_idle(&self, state: &FrameState, field: &str) -> Result<(), ContractError> {
        if state.started_at.is_some() {
            return Err(ContractError::configuration(
                field,
                "cannot change settings while a frame is being acquired",
            ));
        }
        Ok(())
    }

    fn simulate(&self, state: &mut FrameState) {
        let length = state.frame_size;
        let channels = state.active_inputs.clone();
        state.samples = channels
            .into_iter()
            .map(|channel| {
                let data = match self.simulation {
                    SimulationMode::Odmr if length >= 3 => simulate_odmr(&mut state.rng, length),
                    _ => simulate_random(&mut state.rng, length),
                };
                (channel, data)
            })
            .collect();
    }
}

fn simulate_random(rng: &mut StdRng, length: usize) -> Vec<f64> {
    (0..length).map(|_| rng.random::<f64>()).collect()
}

/// Lorentzian dip of 5% depth on a ~200k baseline, centered near the middle of the frame
fn simulate_odmr(rng: &mut StdRng, length: usize) -> Vec<f64> {
    const GAMMA: f64 = 2.0;
    let offset = ((rng.random::<f64>() - 0.5) * 0.05 + 1.0) * 200_000.0;
    let position = length as f64 / 2.0 + (rng.random::<f64>() - 0.5) * length as f64 / 10.0;
    let amplitude = offset / 20.0;
    let noise = amplitude;

    (0..length)
        .map(|i| {
            let x = i as f64 - position;
            offset + (rng.random::<f64>() - 0.5) * noise
                - amplitude * GAMMA.powi(2) / (x.powi(2) + GAMMA.powi(2))
        })
        .collect()
}

impl FiniteSamplingIo for DummySampler {
    fn name(&self) -> &str {
        &self.name
    }

    fn constraints(&self) -> &SamplingConstraints {
        &self.constraints
    }

    fn sample_rate(&self) -> f64 {
        lock(&self.state).sample_rate
    }

    fn frame_size(&self) -> usize {
        lock(&self.state).frame_size
    }

    fn active_input_channels(&self) -> Vec<String> {
        lock(&self.state).active_inputs.clone()
    }

    fn active_output_channels(&self) -> Vec<String> {
        lock(&self.state).active_outputs.clone()
    }

    fn is_running(&self) -> bool {
        lock(&self.state).started_at.is_some()
    }

    async fn set_sample_rate(&self, rate: f64) -> Result<(), ContractError> {
        let mut state = lock(&self.state);
        self.ensure_idle(&state, "sample_rate")?;
        state.sample_rate = self
            .constraints
            .sample_rate_limits()
            .require("sample_rate", rate)?;
        Ok(())
    }

    async fn set_active_channels(
        &self,
        inputs: &[String],
        outputs: &[String],
    ) -> Result<(), ContractError> {
        let mut state = lock(&self.state);
        self.ensure_idle(&state, "active_channels")?;
        if inputs.is_empty() {
            return Err(ContractError::configuration(
                "active_channels",
                "at least one input channel must be active",
            ));
        }
        if let Some(unknown) = inputs
            .iter()
            .find(|c| !self.constraints.input_channel_units().contains_key(*c))
        {
            return Err(ContractError::configuration(
                "active_channels",
                format!("unknown input channel '{unknown}'"),
            ));
        }
        if let Some(unknown) = outputs
            .iter()
            .find(|c| !self.constraints.output_channel_units().contains_key(*c))
        {
            return Err(ContractError::configuration(
                "active_channels",
                format!("unknown output channel '{unknown}'"),
            ));
        }
        state.active_inputs = inputs.to_vec();
        state.active_outputs = outputs.to_vec();
        state.output_data = None;
        Ok(())
    }

    async fn set_frame_size(&self, size: usize) -> Result<(), ContractError> {
        let mut state = lock(&self.state);
        self.ensure_idle(&state, "frame_size")?;
        state.frame_size = self
            .constraints
            .frame_size_limits()
            .require("frame_size", size)?;
        Ok(())
    }

    async fn set_frame_data(
        &self,
        data: &BTreeMap<String, SampleSequence>,
    ) -> Result<(), ContractError> {
        let mut state = lock(&self.state);
        self.ensure_idle(&state, "frame_data")?;

        let channels: Vec<&String> = data.keys().collect();
        let mut active: Vec<&String> = state.active_outputs.iter().collect();
        active.sort();
        if channels != active {
            return Err(ContractError::configuration(
                "frame_data",
                "frame data must cover exactly the active output channels",
            ));
        }

        let mut lengths = data.values().map(SampleSequence::len);
        let size = lengths.next().unwrap_or(0);
        if lengths.any(|len| len != size) {
            return Err(ContractError::configuration(
                "frame_data",
                "all output channels need the same number of samples",
            ));
        }
        if let Some(mode) = data.values().map(SampleSequence::mode).next() {
            if !self.constraints.supported_output_modes().contains(&mode) {
                return Err(ContractError::configuration(
                    "frame_data",
                    format!("output mode {mode} is not supported"),
                ));
            }
        }
        if size > 0 {
            state.frame_size = self
                .constraints
                .frame_size_limits()
                .require("frame_size", size)?;
        }
        state.output_data = Some(data.clone());
        Ok(())
    }

    #[instrument(name = "dummy_sampler_start_frame", skip(self), fields(device = %self.name))]
    async fn start_buffered_frame(&self) -> Result<(), ContractError> {
        let mut state = lock(&self.state);
        if state.started_at.is_some() {
            return Err(ContractError::hardware_state(
                &self.name,
                "frame acquisition already in progress",
            ));
        }
        if self.faults.take(SamplerFault::Fail) {
            warn!(device = %self.name, "Injected frame failure");
            return Err(ContractError::device(&self.name, "injected frame failure"));
        }
        state.stalled = self.faults.take(SamplerFault::Stall);

        self.simulate(&mut state);
        state.returned = 0;
        state.started_at = Some(Instant::now());
        self.frames.fetch_add(1, Ordering::Relaxed);
        debug!(
            device = %self.name,
            frame_size = state.frame_size,
            sample_rate = state.sample_rate,
            "Frame started"
        );
        Ok(())
    }

    async fn stop_buffered_frame(&self) -> Result<(), ContractError> {
        let mut state = lock(&self.state);
        if state.started_at.is_some() {
            let remaining = state.frame_size - state.returned;
            if remaining > 0 {
                warn!(
                    device = %self.name,
                    remaining,
                    "Frame stopped before all samples were read"
                );
            }
            state.started_at = None;
            state.stalled = false;
        }
        Ok(())
    }

    fn samples_in_buffer(&self) -> usize {
        let state = lock(&self.state);
        state.acquired().saturating_sub(state.returned)
    }

    async fn get_buffered_samples(&self, count: usize) -> Result<ChannelFrame, ContractError> {
        let (ready_at, budget, deadline, stalled, frame_size) = {
            let state = lock(&self.state);
            let Some(started) = state.started_at else {
                return Err(ContractError::hardware_state(
                    &self.name,
                    "no frame acquisition in progress",
                ));
            };
            let remaining = state.frame_size - state.returned;
            if count > remaining {
                return Err(ContractError::configuration(
                    "count",
                    format!(
                        "requested {count} samples but only {remaining} remain in this frame"
                    ),
                ));
            }
            if count == 0 {
                return Ok(ChannelFrame::new());
            }
            let ready_at = started
                + Duration::from_secs_f64((state.returned + count) as f64 / state.sample_rate);
            let budget = self.timeout_budget(state.frame_size, state.sample_rate);
            (ready_at, budget, started + budget, state.stalled, state.frame_size)
        };

        if stalled || ready_at > deadline {
            tokio::time::sleep_until(deadline).await;
            return Err(ContractError::acquisition_timeout(
                &self.name,
                budget.as_millis() as u64,
                frame_size,
            ));
        }
        tokio::time::sleep_until(ready_at).await;

        let mut state = lock(&self.state);
        let start = state.returned;
        let data = state
            .samples
            .iter()
            .map(|(channel, samples)| (channel.clone(), samples[start..start + count].to_vec()))
            .collect();
        state.returned += count;
        Ok(data)
    }

    #[instrument(name = "dummy_sampler_acquire_frame", skip(self), fields(device = %self.name))]
    async fn acquire_frame(&self, frame_size: usize) -> Result<ChannelFrame, ContractError> {
        if frame_size != self.frame_size() {
            self.set_frame_size(frame_size).await?;
        }
        self.start_buffered_frame().await?;
        let result = self.get_buffered_samples(frame_size).await;
        self.stop_buffered_frame().await?;
        result
    }
}
