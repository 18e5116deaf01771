//! Scan snapshot metrics
//!
//! Gauges derived from published `ScanSnapshot`s plus an in-memory
//! aggregator for end-of-run summaries. Per-line counters and histograms
//! are recorded by the scan engine itself.

use std::collections::BTreeMap;

use contracts::{ScanSnapshot, ScanState};
use metrics::{counter, gauge};

/// Record gauges from a published snapshot
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_snapshot_metrics;
///
/// let mut rx = engine.subscribe();
/// while rx.changed().await.is_ok() {
///     record_snapshot_metrics(&rx.borrow_and_update());
/// }
/// ```
pub fn record_snapshot_metrics(snapshot: &ScanSnapshot) {
    counter!("odmr_snapshots_total").increment(1);
    gauge!("odmr_snapshot_sequence").set(snapshot.sequence as f64);
    gauge!("odmr_buffer_capacity_lines").set(snapshot.buffer_capacity as f64);
    gauge!("odmr_elapsed_time_seconds").set(snapshot.elapsed_time);
    gauge!("odmr_scan_state").set(state_code(snapshot.state));

    if let Some(duration) = snapshot.last_line_duration {
        gauge!("odmr_last_line_duration_seconds").set(duration);
    }

    for (channel, ranges) in &snapshot.signal_data {
        let (sum, n) = ranges
            .iter()
            .flatten()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n > 0 {
            gauge!("odmr_signal_mean", "channel" => channel.clone()).set(sum / n as f64);
        }
    }
}

/// Record a snapshot hand-off to a sink
pub fn record_snapshot_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "odmr_snapshots_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

fn state_code(state: ScanState) -> f64 {
    match state {
        ScanState::Idle => 0.0,
        ScanState::CwActive => 1.0,
        ScanState::Scanning => 2.0,
        ScanState::Paused => 3.0,
    }
}

/// Scan run aggregator
///
/// Folds the snapshot stream into counters for a summary report.
#[derive(Debug, Clone, Default)]
pub struct ScanMetricsAggregator {
    /// Snapshots seen
    pub total_snapshots: u64,

    /// Highest line count seen
    pub total_lines: u64,

    /// Snapshot sequence gaps (snapshots observers never saw)
    pub skipped_snapshots: u64,

    /// Frame buffer expansions
    pub buffer_growths: u64,

    /// Failures reported in snapshots
    pub failures: Vec<String>,

    /// Transitions into each state
    pub state_changes: BTreeMap<String, u64>,

    /// Wall time per line (seconds)
    pub line_stats: RunningStats,

    /// Elapsed scan time of the last snapshot (seconds)
    pub elapsed_time: f64,

    last_sequence: Option<u64>,
    last_state: Option<ScanState>,
    last_capacity: usize,
    last_failure: Option<String>,
}

impl ScanMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update aggregate statistics
    pub fn update(&mut self, snapshot: &ScanSnapshot) {
        self.total_snapshots += 1;

        if let Some(last) = self.last_sequence {
            if snapshot.sequence > last + 1 {
                self.skipped_snapshots += snapshot.sequence - last - 1;
            }
        }
        self.last_sequence = Some(snapshot.sequence);

        if self.last_state != Some(snapshot.state) {
            *self
                .state_changes
                .entry(snapshot.state.to_string())
                .or_insert(0) += 1;
            self.last_state = Some(snapshot.state);
        }

        if snapshot.elapsed_lines > self.total_lines {
            if let Some(duration) = snapshot.last_line_duration {
                self.line_stats.push(duration);
            }
            self.total_lines = snapshot.elapsed_lines;
        } else if snapshot.elapsed_lines < self.total_lines {
            // data cleared or a new scan started
            self.total_lines = snapshot.elapsed_lines;
        }

        if self.last_capacity > 0 && snapshot.buffer_capacity > self.last_capacity {
            self.buffer_growths += 1;
        }
        self.last_capacity = snapshot.buffer_capacity;

        if snapshot.failure != self.last_failure {
            if let Some(failure) = &snapshot.failure {
                self.failures.push(failure.clone());
            }
            self.last_failure = snapshot.failure.clone();
        }

        self.elapsed_time = snapshot.elapsed_time;
    }

    /// Build a summary report
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_snapshots: self.total_snapshots,
            total_lines: self.total_lines,
            skipped_snapshots: self.skipped_snapshots,
            buffer_growths: self.buffer_growths,
            elapsed_time: self.elapsed_time,
            line_rate: if self.elapsed_time > 0.0 {
                self.total_lines as f64 / self.elapsed_time
            } else {
                0.0
            },
            line_duration_s: StatsSummary::from(&self.line_stats),
            state_changes: self.state_changes.clone(),
            failures: self.failures.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Run summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_snapshots: u64,
    pub total_lines: u64,
    pub skipped_snapshots: u64,
    pub buffer_growths: u64,
    pub elapsed_time: f64,
    pub line_rate: f64,
    pub line_duration_s: StatsSummary,
    pub state_changes: BTreeMap<String, u64>,
    pub failures: Vec<String>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Scan Metrics Summary ===")?;
        writeln!(f, "Lines acquired: {}", self.total_lines)?;
        writeln!(
            f,
            "Elapsed time: {:.2}s ({:.2} lines/s)",
            self.elapsed_time, self.line_rate
        )?;
        writeln!(
            f,
            "Snapshots: {} ({} skipped)",
            self.total_snapshots, self.skipped_snapshots
        )?;
        writeln!(f, "Buffer expansions: {}", self.buffer_growths)?;
        writeln!(f, "Line duration (s): {}", self.line_duration_s)?;

        if !self.state_changes.is_empty() {
            writeln!(f, "State changes:")?;
            for (state, count) in &self.state_changes {
                writeln!(f, "  {}: {}", state, count)?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                writeln!(f, "  {}", failure)?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.4}, max={:.4}, mean={:.4}, std={:.4} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sequence: u64, state: ScanState, lines: u64, capacity: usize) -> ScanSnapshot {
        ScanSnapshot {
            sequence,
            state,
            elapsed_lines: lines,
            elapsed_time: lines as f64 * 0.5,
            buffer_capacity: capacity,
            last_line_duration: (lines > 0).then_some(0.5),
            ..Default::default()
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = ScanMetricsAggregator::new();

        aggregator.update(&snapshot(1, ScanState::Scanning, 0, 2));
        aggregator.update(&snapshot(2, ScanState::Scanning, 1, 2));
        aggregator.update(&snapshot(3, ScanState::Scanning, 2, 2));
        // sequence 4 never observed
        aggregator.update(&snapshot(5, ScanState::Scanning, 3, 4));
        let mut done = snapshot(6, ScanState::Idle, 3, 4);
        done.failure = Some("sampler timed out".into());
        aggregator.update(&done);

        assert_eq!(aggregator.total_snapshots, 5);
        assert_eq!(aggregator.total_lines, 3);
        assert_eq!(aggregator.skipped_snapshots, 1);
        assert_eq!(aggregator.buffer_growths, 1);
        assert_eq!(aggregator.line_stats.count(), 3);
        assert_eq!(aggregator.state_changes.get("scanning"), Some(&1));
        assert_eq!(aggregator.state_changes.get("idle"), Some(&1));
        assert_eq!(aggregator.failures, vec!["sampler timed out".to_string()]);
    }

    #[test]
    fn test_aggregator_follows_cleared_data() {
        let mut aggregator = ScanMetricsAggregator::new();
        aggregator.update(&snapshot(1, ScanState::Scanning, 5, 8));
        aggregator.update(&snapshot(2, ScanState::Scanning, 0, 8));
        aggregator.update(&snapshot(3, ScanState::Scanning, 1, 8));
        assert_eq!(aggregator.total_lines, 1);
    }

    #[test]
    fn test_summary_display() {
        let summary = MetricsSummary {
            total_snapshots: 12,
            total_lines: 10,
            skipped_snapshots: 0,
            buffer_growths: 2,
            elapsed_time: 5.0,
            line_rate: 2.0,
            line_duration_s: StatsSummary {
                count: 10,
                min: 0.4,
                max: 0.6,
                mean: 0.5,
                std_dev: 0.05,
            },
            state_changes: BTreeMap::from([("scanning".to_string(), 1)]),
            failures: Vec::new(),
        };

        let output = format!("{}", summary);
        assert!(output.contains("Lines acquired: 10"));
        assert!(output.contains("2.00 lines/s"));
        assert!(output.contains("scanning: 1"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let snapshot = snapshot(1, ScanState::Scanning, 1, 2);
        record_snapshot_metrics(&snapshot);
        record_snapshot_dispatched("log", true);
    }
}
