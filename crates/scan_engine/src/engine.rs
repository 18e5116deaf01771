//! ScanEngine - the scan state machine
//!
//! Control calls and the acquisition task share one async lock around the
//! `ScanSession`. The task holds it for exactly one line, so a stop or pause
//! lands between two lines and never inside one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    ContractError, CwParameters, FiniteSamplingIo, FrequencyRange, MicrowaveDevice, RangeData,
    ScanBlueprint, ScanMode, ScanParameters, ScanRecord, ScanSnapshot, ScanState,
};
use nalgebra::DMatrix;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::limits::ScanLimits;
use crate::line::{reduce_oversampling, scan_sequence};
use crate::session::ScanSession;

/// Startup values for a new engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Mode used for single-range scans
    pub default_scan_mode: ScanMode,
    /// Recalled scan settings, clamped into the device limits
    pub parameters: ScanParameters,
    pub cw: CwParameters,
}

impl EngineOptions {
    pub fn from_blueprint(blueprint: &ScanBlueprint) -> Self {
        Self {
            default_scan_mode: blueprint.engine.default_scan_mode,
            parameters: blueprint.scan_parameters(),
            cw: blueprint.cw_parameters(),
        }
    }
}

enum LineOutcome {
    Continue,
    Complete,
}

struct Shared<M, S> {
    microwave: Arc<M>,
    sampler: Arc<S>,
    limits: ScanLimits,
    default_scan_mode: ScanMode,
    session: Mutex<ScanSession>,
    status: watch::Sender<ScanSnapshot>,
}

/// ODMR scan engine driving one microwave source and one sampler
pub struct ScanEngine<M, S> {
    shared: Arc<Shared<M, S>>,
}

impl<M, S> Clone for ScanEngine<M, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M, S> ScanEngine<M, S>
where
    M: MicrowaveDevice + Sync + 'static,
    S: FiniteSamplingIo + Sync + 'static,
{
    /// Create an idle engine.
    ///
    /// Recalled values are clamped the way a restart would: run time of at
    /// least one second, oversampling of at least one, CW and scan power
    /// inside the device limits.
    ///
    /// # Errors
    /// `Configuration` if the devices share no usable limits or the recalled
    /// frequency ranges cannot be scanned
    pub fn new(
        microwave: Arc<M>,
        sampler: Arc<S>,
        options: EngineOptions,
    ) -> Result<Self, ContractError> {
        let limits = ScanLimits::combine(microwave.constraints(), sampler.constraints())?;

        let mut params = options.parameters;
        if params.run_time.is_nan() || params.run_time < 1.0 {
            params.run_time = 1.0;
        }
        params.oversampling_factor = params.oversampling_factor.max(1);
        params.scan_power = limits.power.clip(params.scan_power);
        let cw = CwParameters {
            frequency: limits.frequency.clip(options.cw.frequency),
            power: limits.power.clip(options.cw.power),
        };

        let default_scan_mode = if microwave.constraints().supports(options.default_scan_mode) {
            options.default_scan_mode
        } else {
            let fallback = microwave
                .constraints()
                .supported_scan_modes()
                .iter()
                .next()
                .copied()
                .unwrap_or(ScanMode::JumpList);
            warn!(
                requested = %options.default_scan_mode,
                using = %fallback,
                "Default scan mode not supported by microwave"
            );
            fallback
        };
        limits.check(&params)?;
        limits.check_mode(
            scan_mode_for(default_scan_mode, &params),
            params.oversampling_factor,
        )?;

        let channel_units: BTreeMap<String, String> = sampler
            .active_input_channels()
            .into_iter()
            .map(|ch| {
                let unit = sampler.constraints().input_unit(&ch).unwrap_or("").to_string();
                (ch, unit)
            })
            .collect();

        let mut session = ScanSession::new(params, cw, channel_units);
        let (status, _) = watch::channel(session.snapshot());

        info!(
            microwave = microwave.name(),
            sampler = sampler.name(),
            channels = session.channels.len(),
            scan_size = %limits.scan_size,
            sample_rate = %limits.sample_rate,
            "Scan engine ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                microwave,
                sampler,
                limits,
                default_scan_mode,
                session: Mutex::new(session),
                status,
            }),
        })
    }

    // ===== Control surface =====

    /// Replace the scan line definition.
    ///
    /// # Errors
    /// `AlreadyRunning` while a scan is active, `Configuration` for values
    /// outside the combined limits; the session is unchanged on error
    #[instrument(name = "scan_engine_configure", skip(self, frequency_ranges), fields(ranges = frequency_ranges.len()))]
    pub async fn configure(
        &self,
        frequency_ranges: Vec<FrequencyRange>,
        scan_power: f64,
        data_rate: f64,
        oversampling_factor: usize,
    ) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        if session.state.is_active() {
            return Err(ContractError::already_running("configure"));
        }
        let candidate = ScanParameters {
            frequency_ranges,
            scan_power,
            data_rate,
            oversampling_factor,
            ..session.params.clone()
        };
        self.shared.check(&candidate)?;

        session.params = candidate;
        session.reset_data();
        debug!(points = session.params.points_per_line(), "Scan configured");
        self.shared.publish(&mut session);
        Ok(())
    }

    /// Arm both devices and start the acquisition task.
    ///
    /// # Errors
    /// `AlreadyRunning` unless idle. Device failures are returned after the
    /// devices have been put back; the engine stays idle.
    #[instrument(name = "scan_engine_start", skip(self))]
    pub async fn start_scan(&self) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        if session.state != ScanState::Idle {
            return Err(ContractError::already_running("start_scan"));
        }
        self.shared.check(&session.params)?;

        let params = session.params.clone();
        if let Err(err) = self.shared.arm(&params).await {
            error!(error = %err, "Scan start failed");
            return Err(err);
        }

        session.generation += 1;
        session.failure = None;
        session.last_line_duration = None;
        session.reset_data();
        session.state = ScanState::Scanning;
        let generation = session.generation;
        self.shared.publish(&mut session);
        drop(session);

        info!(
            points = params.points_per_line(),
            oversampling = params.oversampling_factor,
            run_time_s = params.run_time,
            "Scan started"
        );
        tokio::spawn(acquisition_loop(Arc::clone(&self.shared), generation));
        Ok(())
    }

    /// Switch the microwave off and end the session.
    ///
    /// No-op unless a scan is running or paused.
    #[instrument(name = "scan_engine_stop", skip(self))]
    pub async fn stop_scan(&self) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        if !session.state.is_active() {
            return Ok(());
        }
        if session.state == ScanState::Scanning {
            session.update_elapsed();
        }
        session.generation += 1;
        session.state = ScanState::Idle;
        let result = self.shared.microwave.off().await;
        if let Err(err) = &result {
            warn!(error = %err, "Microwave did not switch off on stop");
        }
        info!(lines = session.elapsed_lines, elapsed_s = session.elapsed_time, "Scan stopped");
        self.shared.publish(&mut session);
        result
    }

    /// Hold the scan after the current line; data is kept.
    ///
    /// # Errors
    /// `InvalidState` unless scanning
    #[instrument(name = "scan_engine_pause", skip(self))]
    pub async fn pause_scan(&self) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        if session.state != ScanState::Scanning {
            return Err(ContractError::invalid_state("pause scan", session.state));
        }
        self.shared.microwave.off().await?;
        session.update_elapsed();
        session.generation += 1;
        session.state = ScanState::Paused;
        info!(lines = session.elapsed_lines, elapsed_s = session.elapsed_time, "Scan paused");
        self.shared.publish(&mut session);
        Ok(())
    }

    /// Re-arm the devices and resume a paused scan.
    ///
    /// # Errors
    /// `AlreadyRunning` while scanning, `InvalidState` unless paused. A device
    /// failure leaves the scan paused.
    #[instrument(name = "scan_engine_continue", skip(self))]
    pub async fn continue_scan(&self) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        match session.state {
            ScanState::Paused => {}
            ScanState::Scanning => return Err(ContractError::already_running("continue_scan")),
            other => return Err(ContractError::invalid_state("continue scan", other)),
        }

        let params = session.params.clone();
        if let Err(err) = self.shared.arm(&params).await {
            error!(error = %err, "Scan continue failed");
            return Err(err);
        }

        let elapsed = Duration::from_secs_f64(session.elapsed_time.max(0.0));
        session.start_time = Instant::now()
            .checked_sub(elapsed)
            .unwrap_or_else(Instant::now);
        session.generation += 1;
        session.state = ScanState::Scanning;
        let generation = session.generation;
        info!(lines = session.elapsed_lines, "Scan continued");
        self.shared.publish(&mut session);
        drop(session);

        tokio::spawn(acquisition_loop(Arc::clone(&self.shared), generation));
        Ok(())
    }

    /// Lines entering the signal average, 0 = all. Applied immediately.
    pub async fn set_scans_to_average(&self, scans: usize) {
        let mut session = self.lock().await;
        session.params.scans_to_average = scans;
        session.recompute_signal();
        self.shared.publish(&mut session);
    }

    /// # Errors
    /// `AlreadyRunning` while a scan is active, `Configuration` if the
    /// resulting rate or line size is outside the combined limits
    #[instrument(name = "scan_engine_set_sample_rate", skip(self))]
    pub async fn set_sample_rate(
        &self,
        data_rate: f64,
        oversampling_factor: usize,
    ) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        if session.state.is_active() {
            return Err(ContractError::already_running("set_sample_rate"));
        }
        self.shared
            .limits
            .check_rates(&session.params.frequency_ranges, data_rate, oversampling_factor)?;
        self.shared
            .limits
            .check_mode(self.shared.scan_mode(&session.params), oversampling_factor)?;
        session.params.data_rate = data_rate;
        session.params.oversampling_factor = oversampling_factor;
        self.shared.publish(&mut session);
        Ok(())
    }

    /// Scan duration in seconds. A running scan picks it up after the current line.
    pub async fn set_run_time(&self, run_time: f64) -> Result<(), ContractError> {
        if !(run_time.is_finite() && run_time > 0.0) {
            return Err(ContractError::configuration(
                "run_time",
                format!("{run_time} must be a positive number of seconds"),
            ));
        }
        let mut session = self.lock().await;
        session.params.run_time = run_time;
        self.shared.publish(&mut session);
        Ok(())
    }

    /// Replace one frequency range
    #[instrument(name = "scan_engine_set_range", skip(self))]
    pub async fn set_frequency_range(
        &self,
        index: usize,
        range: FrequencyRange,
    ) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        if session.state.is_active() {
            return Err(ContractError::already_running("set_frequency_range"));
        }
        let mut candidate = session.params.clone();
        let count = candidate.frequency_ranges.len();
        let Some(slot) = candidate.frequency_ranges.get_mut(index) else {
            return Err(ContractError::configuration(
                "range_index",
                format!("index {index} out of {count} ranges"),
            ));
        };
        *slot = range;
        self.shared.check(&candidate)?;

        session.params = candidate;
        session.reset_data();
        self.shared.publish(&mut session);
        Ok(())
    }

    /// Grow (repeating the last range) or shrink the range list to `count`
    #[instrument(name = "scan_engine_set_range_count", skip(self))]
    pub async fn set_frequency_range_count(&self, count: usize) -> Result<(), ContractError> {
        if count == 0 {
            return Err(ContractError::configuration(
                "frequency_ranges",
                "at least one range is required",
            ));
        }
        let mut session = self.lock().await;
        if session.state.is_active() {
            return Err(ContractError::already_running("set_frequency_range_count"));
        }
        let mut candidate = session.params.clone();
        let last = candidate.frequency_ranges.last().copied().unwrap_or_default();
        candidate.frequency_ranges.resize(count, last);
        self.shared.check(&candidate)?;

        session.params = candidate;
        session.reset_data();
        self.shared.publish(&mut session);
        Ok(())
    }

    /// Store CW settings, clipped into the microwave limits.
    ///
    /// Active CW output is switched off and on again with the new values.
    #[instrument(name = "scan_engine_set_cw", skip(self))]
    pub async fn set_cw_parameters(
        &self,
        frequency: f64,
        power: f64,
    ) -> Result<CwParameters, ContractError> {
        if !frequency.is_finite() || !power.is_finite() {
            return Err(ContractError::configuration(
                "cw",
                "frequency and power must be finite",
            ));
        }
        let mut session = self.lock().await;
        session.cw = CwParameters {
            frequency: self.shared.limits.frequency.clip(frequency),
            power: self.shared.limits.power.clip(power),
        };
        if session.state == ScanState::CwActive {
            let mw = &self.shared.microwave;
            mw.off().await?;
            session.state = ScanState::Idle;
            session.cw = self.shared.enable_cw(session.cw).await?;
            session.state = ScanState::CwActive;
        }
        let cw = session.cw;
        self.shared.publish(&mut session);
        Ok(cw)
    }

    /// Switch CW output on or off.
    ///
    /// # Errors
    /// `InvalidState` when enabling during a scan
    #[instrument(name = "scan_engine_toggle_cw", skip(self))]
    pub async fn toggle_cw_output(&self, enable: bool) -> Result<(), ContractError> {
        let mut session = self.lock().await;
        match (enable, session.state) {
            (true, ScanState::CwActive) | (false, ScanState::Idle) => return Ok(()),
            (true, ScanState::Idle) => {
                session.cw = self.shared.enable_cw(session.cw).await?;
                session.state = ScanState::CwActive;
                info!(frequency = session.cw.frequency, power = session.cw.power, "CW output on");
            }
            (false, ScanState::CwActive) => {
                self.shared.microwave.off().await?;
                session.state = ScanState::Idle;
                info!("CW output off");
            }
            (true, state) => {
                return Err(ContractError::invalid_state("enable cw output", state));
            }
            (false, _) => return Ok(()),
        }
        self.shared.publish(&mut session);
        Ok(())
    }

    /// Drop acquired lines and restart the clock, also while scanning
    #[instrument(name = "scan_engine_clear", skip(self))]
    pub async fn clear_data(&self) {
        let mut session = self.lock().await;
        session.clear_lines();
        debug!(capacity = session.buffer.capacity(), "Scan data cleared");
        self.shared.publish(&mut session);
    }

    // ===== Observation surface =====

    /// Receiver of every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.shared.status.subscribe()
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.shared.status.borrow().clone()
    }

    pub fn state(&self) -> ScanState {
        self.shared.status.borrow().state
    }

    pub fn is_running(&self) -> bool {
        self.shared.status.borrow().is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.status.borrow().is_paused()
    }

    pub fn elapsed_lines(&self) -> u64 {
        self.shared.status.borrow().elapsed_lines
    }

    pub fn elapsed_time(&self) -> f64 {
        self.shared.status.borrow().elapsed_time
    }

    pub fn signal_data(&self) -> RangeData {
        self.shared.status.borrow().signal_data.clone()
    }

    pub fn frequency_data(&self) -> Vec<Vec<f64>> {
        self.shared.status.borrow().frequency_data.clone()
    }

    /// Error that ended the last scan
    pub fn last_error(&self) -> Option<String> {
        self.shared.status.borrow().failure.clone()
    }

    pub fn limits(&self) -> &ScanLimits {
        &self.shared.limits
    }

    pub async fn scan_parameters(&self) -> ScanParameters {
        self.lock().await.params.clone()
    }

    pub async fn cw_parameters(&self) -> CwParameters {
        self.lock().await.cw
    }

    /// Buffer contents per channel, one `bins x capacity` matrix per range.
    ///
    /// Column 0 is the newest line; unfilled columns are NaN.
    pub async fn raw_data(&self) -> Result<BTreeMap<String, Vec<DMatrix<f64>>>, ContractError> {
        let session = self.lock().await;
        let mut out = BTreeMap::new();
        for ch in &session.channels {
            let matrix = session.buffer.raw(ch)?;
            let mut offset = 0;
            let mut ranges = Vec::with_capacity(session.params.frequency_ranges.len());
            for range in &session.params.frequency_ranges {
                ranges.push(matrix.rows(offset, range.points).clone_owned());
                offset += range.points;
            }
            out.insert(ch.clone(), ranges);
        }
        Ok(out)
    }

    /// Everything needed to save the current data
    pub async fn record(&self) -> Result<ScanRecord, ContractError> {
        Ok(self.lock().await.record()?)
    }

    /// Wait until the engine leaves the scanning state
    pub async fn wait_while_scanning(&self) -> ScanSnapshot {
        let mut rx = self.subscribe();
        let done = match rx.wait_for(|s| s.state != ScanState::Scanning).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        done
    }

    async fn lock(&self) -> MutexGuard<'_, ScanSession> {
        self.shared.session.lock().await
    }
}

impl<M, S> Shared<M, S>
where
    M: MicrowaveDevice + Sync + 'static,
    S: FiniteSamplingIo + Sync + 'static,
{
    fn publish(&self, session: &mut ScanSession) {
        self.status.send_replace(session.snapshot());
    }

    fn scan_mode(&self, params: &ScanParameters) -> ScanMode {
        scan_mode_for(self.default_scan_mode, params)
    }

    /// Combined limits plus the rules of the mode `params` will run in
    fn check(&self, params: &ScanParameters) -> Result<(), ContractError> {
        self.limits.check(params)?;
        self.limits
            .check_mode(self.scan_mode(params), params.oversampling_factor)
    }

    /// Configure sampler and microwave, then start the microwave output.
    ///
    /// On failure the microwave is switched off and the sampler settings
    /// are restored before the error is returned.
    async fn arm(&self, params: &ScanParameters) -> Result<(), ContractError> {
        let mode = self.scan_mode(params);
        let frequencies = scan_sequence(&params.frequency_ranges, mode, params.oversampling_factor);
        let frame_size = params.points_per_line() * params.oversampling_factor;
        let sample_rate = params.sample_rate();
        let previous = (self.sampler.sample_rate(), self.sampler.frame_size());

        let result = async {
            self.sampler.set_sample_rate(sample_rate).await?;
            self.sampler.set_frame_size(frame_size).await?;
            self.microwave
                .configure_scan(params.scan_power, &frequencies, mode, sample_rate)
                .await?;
            self.microwave.start_scan().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(%mode, frame_size, sample_rate, "Devices armed");
                Ok(())
            }
            Err(err) => {
                self.disarm(previous).await;
                Err(err)
            }
        }
    }

    async fn disarm(&self, (sample_rate, frame_size): (f64, usize)) {
        if let Err(err) = self.microwave.off().await {
            warn!(error = %err, "Microwave did not switch off while unwinding");
        }
        if let Err(err) = self.sampler.set_sample_rate(sample_rate).await {
            debug!(error = %err, "Sampler rate not restored");
        }
        if let Err(err) = self.sampler.set_frame_size(frame_size).await {
            debug!(error = %err, "Sampler frame size not restored");
        }
    }

    /// CW output on with `cw`; the output is off again if anything fails
    async fn enable_cw(&self, cw: CwParameters) -> Result<CwParameters, ContractError> {
        let result = async {
            let applied = self.microwave.set_cw(cw.frequency, cw.power).await?;
            self.microwave.cw_on().await?;
            Ok(applied)
        }
        .await;
        if result.is_err() {
            if let Err(err) = self.microwave.off().await {
                warn!(error = %err, "Microwave did not switch off after CW failure");
            }
        }
        result
    }

    /// One line: acquire, reduce, rewind the microwave, store, average
    async fn acquire_line(&self, session: &mut ScanSession) -> Result<LineOutcome, ContractError> {
        let started = Instant::now();
        let device = self.sampler.name();
        let bins = session.params.points_per_line();
        let factor = session.params.oversampling_factor;

        let mut frame = self.sampler.acquire_frame(bins * factor).await?;
        let mut line = Vec::with_capacity(session.channels.len());
        for ch in &session.channels {
            let samples = frame.remove(ch).ok_or_else(|| {
                ContractError::device(device, format!("frame is missing channel {ch}"))
            })?;
            line.push((ch.clone(), reduce_oversampling(device, ch, &samples, bins, factor)?));
        }

        self.microwave.reset_scan().await?;

        let growth = session
            .buffer
            .push_lines(line.iter().map(|(ch, values)| (ch.as_str(), values.as_slice())))
            .map_err(|e| ContractError::device(device, e.to_string()))?;
        if let Some(growth) = growth {
            warn!(
                from = growth.from,
                to = growth.to,
                "Frame buffer full, doubling capacity"
            );
            metrics::counter!("odmr_buffer_expansions_total").increment(1);
        }
        session.elapsed_lines += 1;
        session.recompute_signal();
        session.update_elapsed();

        let duration = started.elapsed().as_secs_f64();
        session.last_line_duration = Some(duration);
        metrics::counter!("odmr_lines_total").increment(1);
        metrics::histogram!("odmr_line_duration_seconds").record(duration);
        metrics::gauge!("odmr_elapsed_lines").set(session.elapsed_lines as f64);
        debug!(
            lines = session.elapsed_lines,
            elapsed_s = session.elapsed_time,
            line_s = duration,
            "Line acquired"
        );

        if session.elapsed_time >= session.params.run_time {
            Ok(LineOutcome::Complete)
        } else {
            Ok(LineOutcome::Continue)
        }
    }

    /// Leave the scan after completion or a line failure
    async fn finish(&self, session: &mut ScanSession, failure: Option<ContractError>) {
        if let Err(err) = self.microwave.off().await {
            warn!(error = %err, "Microwave did not switch off after scan");
        }
        session.generation += 1;
        session.state = ScanState::Idle;
        match failure {
            Some(err) => {
                error!(
                    error = %err,
                    lines = session.elapsed_lines,
                    "Scan aborted"
                );
                metrics::counter!("odmr_scan_failures_total").increment(1);
                session.failure = Some(err.to_string());
            }
            None => info!(
                lines = session.elapsed_lines,
                elapsed_s = session.elapsed_time,
                "Scan complete"
            ),
        }
        self.publish(session);
    }
}

/// Mode actually used for `params`: several ranges always need a jump list
fn scan_mode_for(default_scan_mode: ScanMode, params: &ScanParameters) -> ScanMode {
    if params.frequency_ranges.len() > 1 {
        ScanMode::JumpList
    } else {
        default_scan_mode
    }
}

/// Acquisition task: one line per lock, until the session moves on
async fn acquisition_loop<M, S>(shared: Arc<Shared<M, S>>, generation: u64)
where
    M: MicrowaveDevice + Sync + 'static,
    S: FiniteSamplingIo + Sync + 'static,
{
    loop {
        let mut session = shared.session.lock().await;
        if session.generation != generation || session.state != ScanState::Scanning {
            break;
        }
        match shared.acquire_line(&mut session).await {
            Ok(LineOutcome::Continue) => shared.publish(&mut session),
            Ok(LineOutcome::Complete) => {
                shared.finish(&mut session, None).await;
                break;
            }
            Err(err) => {
                shared.finish(&mut session, Some(err)).await;
                break;
            }
        }
        drop(session);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instruments::{
        DeviceFactory, DummyMicrowave, DummySampler, MicrowaveFault, SamplerFault,
    };

    type Engine = ScanEngine<DummyMicrowave, DummySampler>;

    struct Rig {
        engine: Engine,
        microwave: Arc<DummyMicrowave>,
        sampler: Arc<DummySampler>,
    }

    fn rig_with(blueprint: ScanBlueprint) -> Rig {
        let pair = DeviceFactory::from_blueprint(&blueprint).unwrap();
        let microwave = Arc::new(pair.microwave);
        let sampler = Arc::new(pair.sampler);
        let engine = ScanEngine::new(
            Arc::clone(&microwave),
            Arc::clone(&sampler),
            EngineOptions::from_blueprint(&blueprint),
        )
        .unwrap();
        Rig {
            engine,
            microwave,
            sampler,
        }
    }

    fn rig() -> Rig {
        let mut blueprint = ScanBlueprint::default();
        blueprint.sampler.seed = Some(11);
        rig_with(blueprint)
    }

    /// 10 points at 1 kHz: 10 ms per line
    async fn fast_scan(engine: &Engine, run_time: f64) {
        engine
            .configure(vec![FrequencyRange::new(2.8e9, 2.9e9, 10)], -20.0, 1000.0, 1)
            .await
            .unwrap();
        engine.set_run_time(run_time).await.unwrap();
    }

    async fn wait_for_lines(engine: &Engine, lines: u64) {
        let mut rx = engine.subscribe();
        rx.wait_for(|s| s.elapsed_lines >= lines || s.state != ScanState::Scanning)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_scan_builds_frequency_axis() {
        let rig = rig();
        rig.engine
            .configure(vec![FrequencyRange::new(2.82e9, 2.92e9, 101)], -10.0, 100.0, 1)
            .await
            .unwrap();
        rig.engine.start_scan().await.unwrap();

        let freqs = rig.engine.frequency_data();
        assert_eq!(freqs[0].len(), 101);
        assert_eq!(freqs[0][0], 2.82e9);
        assert_eq!(freqs[0][100], 2.92e9);
        assert!(rig.engine.is_running());
        assert!(rig.microwave.is_scanning());

        rig.engine.stop_scan().await.unwrap();
        assert_eq!(rig.engine.state(), ScanState::Idle);
        assert!(!rig.microwave.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_runs_until_run_time() {
        let rig = rig();
        fast_scan(&rig.engine, 1.0).await;
        rig.engine.start_scan().await.unwrap();

        let done = rig.engine.wait_while_scanning().await;
        assert_eq!(done.state, ScanState::Idle);
        assert!(done.elapsed_lines >= 1);
        assert!(done.elapsed_time >= 1.0);
        assert!(done.failure.is_none());
        assert!(!rig.microwave.is_scanning());

        let signal = rig.engine.signal_data();
        assert_eq!(signal["APD counts"][0].len(), 10);
        assert!(signal["APD counts"][0].iter().all(|v| *v > 0.0));
    }

    #[tokio::test]
    async fn test_every_line_resets_microwave() {
        let rig = rig();
        fast_scan(&rig.engine, 0.2).await;
        rig.engine.start_scan().await.unwrap();
        let done = rig.engine.wait_while_scanning().await;

        let counts = rig.microwave.call_counts();
        assert_eq!(counts.reset, done.elapsed_lines);
        assert_eq!(rig.sampler.frames_started(), done.elapsed_lines);
    }

    #[tokio::test]
    async fn test_start_while_running_rejected() {
        let rig = rig();
        fast_scan(&rig.engine, 30.0).await;
        rig.engine.start_scan().await.unwrap();

        let err = rig.engine.start_scan().await.unwrap_err();
        assert!(matches!(err, ContractError::AlreadyRunning { .. }));
        let err = rig
            .engine
            .configure(vec![FrequencyRange::default()], -20.0, 100.0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::AlreadyRunning { .. }));
        assert!(rig.engine.set_sample_rate(50.0, 1).await.is_err());

        rig.engine.stop_scan().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let rig = rig();
        rig.engine.stop_scan().await.unwrap();
        let before = rig.engine.snapshot();
        rig.engine.stop_scan().await.unwrap();
        let after = rig.engine.snapshot();

        assert_eq!(before.sequence, after.sequence);
        assert_eq!(after.state, ScanState::Idle);
        assert_eq!(rig.microwave.call_counts().off, 0);
    }

    #[tokio::test]
    async fn test_stop_prevents_further_lines() {
        let rig = rig();
        fast_scan(&rig.engine, 30.0).await;
        rig.engine.start_scan().await.unwrap();
        wait_for_lines(&rig.engine, 3).await;

        rig.engine.stop_scan().await.unwrap();
        let frames = rig.sampler.frames_started();
        let lines = rig.engine.elapsed_lines();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(rig.sampler.frames_started(), frames);
        assert_eq!(rig.engine.elapsed_lines(), lines);
        assert_eq!(rig.engine.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_pause_and_continue_keep_lines() {
        let rig = rig();
        fast_scan(&rig.engine, 30.0).await;
        rig.engine.start_scan().await.unwrap();
        wait_for_lines(&rig.engine, 3).await;

        rig.engine.pause_scan().await.unwrap();
        assert!(rig.engine.is_paused());
        assert!(!rig.microwave.is_scanning());
        let paused_lines = rig.engine.elapsed_lines();
        let paused_time = rig.engine.elapsed_time();
        assert!(paused_lines >= 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rig.engine.elapsed_lines(), paused_lines);

        rig.engine.continue_scan().await.unwrap();
        assert!(rig.microwave.is_scanning());
        wait_for_lines(&rig.engine, paused_lines + 2).await;
        assert!(rig.engine.elapsed_lines() >= paused_lines + 2);
        // the paused interval is not counted
        assert!(rig.engine.elapsed_time() < paused_time + 0.4);

        rig.engine.stop_scan().await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_and_continue_require_matching_state() {
        let rig = rig();
        let err = rig.engine.pause_scan().await.unwrap_err();
        assert!(matches!(err, ContractError::InvalidState { .. }));
        let err = rig.engine.continue_scan().await.unwrap_err();
        assert!(matches!(err, ContractError::InvalidState { .. }));

        fast_scan(&rig.engine, 30.0).await;
        rig.engine.start_scan().await.unwrap();
        let err = rig.engine.continue_scan().await.unwrap_err();
        assert!(matches!(err, ContractError::AlreadyRunning { .. }));
        rig.engine.stop_scan().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_unwinds_to_idle() {
        let rig = rig();
        fast_scan(&rig.engine, 1.0).await;
        rig.microwave.inject_fault(MicrowaveFault::Start);

        let err = rig.engine.start_scan().await.unwrap_err();
        assert!(err.is_hardware());
        assert_eq!(rig.engine.state(), ScanState::Idle);
        assert!(!rig.microwave.is_scanning());
        assert_eq!(rig.sampler.frames_started(), 0);

        // a clean retry works
        rig.engine.start_scan().await.unwrap();
        rig.engine.stop_scan().await.unwrap();
    }

    #[tokio::test]
    async fn test_acquisition_failure_stops_scan() {
        let rig = rig();
        fast_scan(&rig.engine, 30.0).await;
        rig.engine.start_scan().await.unwrap();
        wait_for_lines(&rig.engine, 2).await;
        rig.sampler.inject_fault(SamplerFault::Fail);

        let done = rig.engine.wait_while_scanning().await;
        assert_eq!(done.state, ScanState::Idle);
        assert!(done.has_failed());
        assert!(rig.engine.last_error().is_some());
        assert!(!rig.microwave.is_scanning());

        // the engine can scan again
        rig.engine.start_scan().await.unwrap();
        assert!(rig.engine.last_error().is_none());
        rig.engine.stop_scan().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reset_stops_scan_even_if_off_fails() {
        let rig = rig();
        fast_scan(&rig.engine, 30.0).await;
        rig.engine.start_scan().await.unwrap();
        rig.microwave.inject_fault(MicrowaveFault::Reset);
        rig.microwave.inject_fault(MicrowaveFault::Off);

        let done = rig.engine.wait_while_scanning().await;
        assert_eq!(done.state, ScanState::Idle);
        assert!(done.failure.unwrap().contains("Reset"));
    }

    #[tokio::test]
    async fn test_configure_round_trip() {
        let rig = rig();
        let ranges = vec![
            FrequencyRange::new(2.80e9, 2.85e9, 21),
            FrequencyRange::new(2.88e9, 2.95e9, 31),
        ];
        rig.engine
            .configure(ranges.clone(), -12.5, 250.0, 2)
            .await
            .unwrap();

        let params = rig.engine.scan_parameters().await;
        assert_eq!(params.frequency_ranges, ranges);
        assert_eq!(params.scan_power, -12.5);
        assert_eq!(params.data_rate, 250.0);
        assert_eq!(params.oversampling_factor, 2);
        assert_eq!(rig.engine.frequency_data().len(), 2);
    }

    #[tokio::test]
    async fn test_configure_rejects_degenerate_ranges_without_mutation() {
        let rig = rig();
        let before = rig.engine.scan_parameters().await;

        for bad in [
            FrequencyRange::new(2.87e9, 2.87e9, 10),
            FrequencyRange::new(2.80e9, 2.90e9, 1),
        ] {
            let err = rig
                .engine
                .configure(vec![bad], -10.0, 100.0, 1)
                .await
                .unwrap_err();
            assert!(err.is_configuration());
        }
        assert_eq!(rig.engine.scan_parameters().await, before);
    }

    #[tokio::test]
    async fn test_multi_range_requires_jump_list() {
        let mut blueprint = ScanBlueprint::default();
        blueprint.microwave.supported_scan_modes = [ScanMode::EquidistantSweep].into();
        blueprint.engine.default_scan_mode = ScanMode::EquidistantSweep;
        let rig = rig_with(blueprint);

        let err = rig
            .engine
            .configure(
                vec![FrequencyRange::default(), FrequencyRange::default()],
                -10.0,
                100.0,
                1,
            )
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(rig.engine.set_frequency_range_count(2).await.is_err());
    }

    #[tokio::test]
    async fn test_multi_range_scan_uses_jump_list() {
        let rig = rig();
        rig.engine
            .configure(
                vec![
                    FrequencyRange::new(2.80e9, 2.82e9, 5),
                    FrequencyRange::new(2.90e9, 2.92e9, 5),
                ],
                -10.0,
                1000.0,
                2,
            )
            .await
            .unwrap();
        rig.engine.set_run_time(0.1).await.unwrap();
        rig.engine.start_scan().await.unwrap();

        assert_eq!(rig.microwave.scan_mode(), ScanMode::JumpList);
        assert_eq!(rig.microwave.scan_frequencies().unwrap().len(), 20);
        assert_eq!(rig.sampler.sample_rate(), 2000.0);

        let done = rig.engine.wait_while_scanning().await;
        assert_eq!(done.signal_data["Photodiode"].len(), 2);
        assert_eq!(done.signal_data["Photodiode"][1].len(), 5);
    }

    #[tokio::test]
    async fn test_sample_rate_outside_combined_limits() {
        let mut blueprint = ScanBlueprint::default();
        blueprint.microwave.sample_rate_limits = contracts::Limits::new(0.1, 500.0).unwrap();
        let rig = rig_with(blueprint);

        // sampler allows 1e6 but the microwave stops at 500
        let err = rig.engine.set_sample_rate(300.0, 2).await.unwrap_err();
        assert!(err.is_configuration());
        rig.engine.set_sample_rate(250.0, 2).await.unwrap();
        assert_eq!(rig.engine.scan_parameters().await.sample_rate(), 500.0);
    }

    #[tokio::test]
    async fn test_sweep_rejects_oversampling() {
        let mut blueprint = ScanBlueprint::default();
        blueprint.engine.default_scan_mode = ScanMode::EquidistantSweep;
        let rig = rig_with(blueprint);
        let single = vec![FrequencyRange::new(2.8e9, 2.9e9, 10)];

        let err = rig
            .engine
            .configure(single.clone(), -20.0, 1000.0, 4)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(rig.engine.scan_parameters().await.oversampling_factor, 1);

        rig.engine.configure(single, -20.0, 1000.0, 1).await.unwrap();
        assert!(rig.engine.set_sample_rate(1000.0, 4).await.is_err());
        rig.engine.set_sample_rate(500.0, 1).await.unwrap();

        // two ranges run as a jump list, which repeats every point
        let two = vec![
            FrequencyRange::new(2.80e9, 2.84e9, 10),
            FrequencyRange::new(2.90e9, 2.94e9, 10),
        ];
        rig.engine.configure(two, -20.0, 1000.0, 4).await.unwrap();
        rig.engine.set_run_time(0.1).await.unwrap();
        rig.engine.start_scan().await.unwrap();
        assert_eq!(rig.microwave.scan_mode(), ScanMode::JumpList);
        let done = rig.engine.wait_while_scanning().await;
        assert!(done.failure.is_none(), "{:?}", done.failure);
        assert!(done.elapsed_lines >= 1);
    }

    #[tokio::test]
    async fn test_recalled_sweep_with_oversampling_rejected() {
        let mut blueprint = ScanBlueprint::default();
        blueprint.engine.default_scan_mode = ScanMode::EquidistantSweep;
        blueprint.scan.oversampling_factor = 3;
        let pair = DeviceFactory::from_blueprint(&blueprint).unwrap();
        let err = ScanEngine::new(
            Arc::new(pair.microwave),
            Arc::new(pair.sampler),
            EngineOptions::from_blueprint(&blueprint),
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_huge_run_time_keeps_buffer_reserve_bounded() {
        let rig = rig();
        rig.engine.set_run_time(1e20).await.unwrap();
        rig.engine
            .configure(vec![FrequencyRange::new(2.8e9, 2.9e9, 10)], -20.0, 1000.0, 1)
            .await
            .unwrap();
        assert!(rig.engine.snapshot().buffer_capacity <= crate::session::MAX_PREALLOCATED_LINES);

        rig.engine.start_scan().await.unwrap();
        wait_for_lines(&rig.engine, 2).await;
        rig.engine.stop_scan().await.unwrap();
        let snapshot = rig.engine.snapshot();
        assert!(snapshot.elapsed_lines >= 2);
        assert!(snapshot.buffer_capacity <= crate::session::MAX_PREALLOCATED_LINES);
    }

    #[tokio::test]
    async fn test_scans_to_average_recomputes_signal() {
        let rig = rig();
        fast_scan(&rig.engine, 0.3).await;
        rig.engine.start_scan().await.unwrap();
        rig.engine.wait_while_scanning().await;

        let all = rig.engine.signal_data();
        rig.engine.set_scans_to_average(1).await;
        let newest = rig.engine.signal_data();
        let raw = rig.engine.raw_data().await.unwrap();

        let column: Vec<f64> = raw["APD counts"][0].column(0).iter().copied().collect();
        assert_eq!(newest["APD counts"][0], column);
        assert_eq!(all["APD counts"][0].len(), newest["APD counts"][0].len());
    }

    #[tokio::test]
    async fn test_clear_data_resets_counters() {
        let rig = rig();
        fast_scan(&rig.engine, 0.2).await;
        rig.engine.start_scan().await.unwrap();
        rig.engine.wait_while_scanning().await;
        assert!(rig.engine.elapsed_lines() > 0);

        rig.engine.clear_data().await;
        let snap = rig.engine.snapshot();
        assert_eq!(snap.elapsed_lines, 0);
        assert_eq!(snap.elapsed_time, 0.0);
        assert!(snap.signal_data["APD counts"][0].iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_cw_output_toggles_and_blocks_scan() {
        let rig = rig();
        let cw = rig.engine.set_cw_parameters(2.87e9, 100.0).await.unwrap();
        // power clipped to the 30 dBm limit
        assert_eq!(cw.power, 30.0);

        rig.engine.toggle_cw_output(true).await.unwrap();
        assert_eq!(rig.engine.state(), ScanState::CwActive);
        assert_eq!(rig.microwave.output_mode(), Some(contracts::MicrowaveMode::Cw));
        assert!(rig.engine.start_scan().await.is_err());

        rig.engine.toggle_cw_output(false).await.unwrap();
        assert_eq!(rig.engine.state(), ScanState::Idle);
        assert_eq!(rig.microwave.output_mode(), None);
    }

    #[tokio::test]
    async fn test_range_count_grows_by_repeating_last() {
        let rig = rig();
        rig.engine.set_frequency_range_count(3).await.unwrap();
        let params = rig.engine.scan_parameters().await;
        assert_eq!(params.frequency_ranges.len(), 3);
        assert_eq!(params.frequency_ranges[2], params.frequency_ranges[0]);

        rig.engine
            .set_frequency_range(1, FrequencyRange::new(3.0e9, 3.1e9, 11))
            .await
            .unwrap();
        assert_eq!(rig.engine.frequency_data()[1].len(), 11);
        assert!(rig
            .engine
            .set_frequency_range(5, FrequencyRange::default())
            .await
            .is_err());

        rig.engine.set_frequency_range_count(1).await.unwrap();
        assert_eq!(rig.engine.frequency_data().len(), 1);
    }

    #[tokio::test]
    async fn test_recalled_values_are_clamped() {
        let mut blueprint = ScanBlueprint::default();
        blueprint.scan.run_time = 0.2;
        blueprint.scan.cw_frequency = 50e9;
        blueprint.scan.oversampling_factor = 0;
        let rig = rig_with(blueprint);

        let params = rig.engine.scan_parameters().await;
        assert_eq!(params.run_time, 1.0);
        assert_eq!(params.oversampling_factor, 1);
        assert_eq!(rig.engine.cw_parameters().await.frequency, 20e9);
    }

    #[tokio::test]
    async fn test_record_trims_raw_lines() {
        let rig = rig();
        fast_scan(&rig.engine, 0.2).await;
        rig.engine.start_scan().await.unwrap();
        let done = rig.engine.wait_while_scanning().await;

        let record = rig.engine.record().await.unwrap();
        assert_eq!(record.metadata.elapsed_lines, done.elapsed_lines);
        let bins = &record.raw_data["APD counts"][0];
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].len() as u64, done.elapsed_lines);
        assert!(bins[0].iter().all(|v| v.is_finite()));
    }
}
