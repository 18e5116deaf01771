//! Mutable state of one engine, guarded by the engine's control lock

use std::collections::BTreeMap;

use contracts::{
    CwParameters, FrequencyRange, RangeData, ScanMetadata, ScanParameters, ScanRecord,
    ScanSnapshot, ScanState,
};
use tokio::time::Instant;

use crate::buffer::{BufferError, FrameBuffer};
use crate::line::split_ranges;

/// Line-count guess for a fresh buffer: 5 % headroom over `run_time`
pub fn estimated_lines(params: &ScanParameters) -> usize {
    let points = params.points_per_line().max(1) as f64;
    let estimate = 1.05 * params.run_time * params.data_rate / points;
    if estimate.is_finite() && estimate >= 1.0 {
        estimate as usize
    } else {
        1
    }
}

/// Upper bound on lines reserved up front; longer scans grow by doubling
pub const MAX_PREALLOCATED_LINES: usize = 4096;

/// Lines reserved when a buffer is created for `params`
pub fn initial_capacity(params: &ScanParameters) -> usize {
    estimated_lines(params).min(MAX_PREALLOCATED_LINES)
}

#[derive(Debug)]
pub(crate) struct ScanSession {
    pub state: ScanState,
    pub params: ScanParameters,
    pub cw: CwParameters,
    /// Bumped on every start/pause/stop so a stale acquisition task exits
    pub generation: u64,
    pub channels: Vec<String>,
    pub channel_units: BTreeMap<String, String>,
    pub frequency_data: Vec<Vec<f64>>,
    pub buffer: FrameBuffer,
    /// Full-line average per channel
    pub signal: BTreeMap<String, Vec<f64>>,
    /// Shifted back by the elapsed time when a paused scan continues
    pub start_time: Instant,
    pub elapsed_time: f64,
    pub elapsed_lines: u64,
    pub last_line_duration: Option<f64>,
    pub failure: Option<String>,
    sequence: u64,
}

impl ScanSession {
    pub fn new(
        params: ScanParameters,
        cw: CwParameters,
        channel_units: BTreeMap<String, String>,
    ) -> Self {
        let channels: Vec<String> = channel_units.keys().cloned().collect();
        let buffer = FrameBuffer::new(
            channels.iter().cloned(),
            params.points_per_line(),
            initial_capacity(&params),
        );
        let mut session = Self {
            state: ScanState::Idle,
            params,
            cw,
            generation: 0,
            channels,
            channel_units,
            frequency_data: Vec::new(),
            buffer,
            signal: BTreeMap::new(),
            start_time: Instant::now(),
            elapsed_time: 0.0,
            elapsed_lines: 0,
            last_line_duration: None,
            failure: None,
            sequence: 0,
        };
        session.reset_data();
        session
    }

    /// Fresh frequency axis, empty buffer sized for the current parameters
    pub fn reset_data(&mut self) {
        self.frequency_data = self
            .params
            .frequency_ranges
            .iter()
            .map(FrequencyRange::frequencies)
            .collect();
        self.buffer = FrameBuffer::new(
            self.channels.iter().cloned(),
            self.params.points_per_line(),
            initial_capacity(&self.params),
        );
        self.elapsed_lines = 0;
        self.elapsed_time = 0.0;
        self.start_time = Instant::now();
        self.recompute_signal();
    }

    /// Drop acquired lines but keep the current buffer geometry
    pub fn clear_lines(&mut self) {
        self.buffer.clear();
        self.elapsed_lines = 0;
        self.elapsed_time = 0.0;
        self.start_time = Instant::now();
        self.recompute_signal();
    }

    pub fn recompute_signal(&mut self) {
        let max_lines = self.params.scans_to_average;
        let bins = self.buffer.bins();
        self.signal = self
            .channels
            .iter()
            .map(|ch| {
                let avg = self
                    .buffer
                    .average(ch, max_lines)
                    .unwrap_or_else(|_| vec![0.0; bins]);
                (ch.clone(), avg)
            })
            .collect();
    }

    pub fn update_elapsed(&mut self) {
        self.elapsed_time = self.start_time.elapsed().as_secs_f64();
    }

    pub fn signal_by_range(&self) -> RangeData {
        self.signal
            .iter()
            .map(|(ch, line)| {
                let parts = split_ranges(line, &self.params.frequency_ranges)
                    .map(<[f64]>::to_vec)
                    .collect();
                (ch.clone(), parts)
            })
            .collect()
    }

    /// Next snapshot in sequence
    pub fn snapshot(&mut self) -> ScanSnapshot {
        self.sequence += 1;
        ScanSnapshot {
            sequence: self.sequence,
            state: self.state,
            elapsed_lines: self.elapsed_lines,
            elapsed_time: self.elapsed_time,
            buffer_capacity: self.buffer.capacity(),
            frequency_data: self.frequency_data.clone(),
            signal_data: self.signal_by_range(),
            channel_units: self.channel_units.clone(),
            last_line_duration: self.last_line_duration,
            failure: self.failure.clone(),
        }
    }

    /// Raw lines per channel and range: bin -> lines, newest first
    pub fn raw_lines(&self, trimmed: bool) -> Result<BTreeMap<String, Vec<Vec<Vec<f64>>>>, BufferError> {
        let keep = if trimmed {
            self.buffer.elapsed_lines()
        } else {
            self.buffer.capacity()
        };
        let mut out = BTreeMap::new();
        for ch in &self.channels {
            let matrix = self.buffer.raw(ch)?;
            let mut offset = 0;
            let mut ranges = Vec::with_capacity(self.params.frequency_ranges.len());
            for range in &self.params.frequency_ranges {
                let bins = (offset..offset + range.points)
                    .map(|row| matrix.row(row).iter().take(keep).copied().collect())
                    .collect();
                ranges.push(bins);
                offset += range.points;
            }
            out.insert(ch.clone(), ranges);
        }
        Ok(out)
    }

    pub fn record(&self) -> Result<ScanRecord, BufferError> {
        Ok(ScanRecord {
            metadata: ScanMetadata::from_parameters(
                &self.params,
                self.cw.frequency,
                self.cw.power,
                self.elapsed_time,
                self.elapsed_lines,
            ),
            channel_units: self.channel_units.clone(),
            frequency_data: self.frequency_data.clone(),
            signal_data: self.signal_by_range(),
            raw_data: self.raw_lines(true)?,
        })
    }
}
