//! Pipeline statistics and metrics.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use contracts::{CwParameters, ScanParameters};
use dispatcher::DispatchSummary;
use observability::ScanMetricsAggregator;

/// Why the scan ended
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Run time reached
    Completed,
    /// `--max-lines` reached
    MaxLines,
    /// `--timeout` reached
    Timeout,
    /// Ctrl+C or SIGTERM
    Interrupted,
    /// Device or acquisition error
    Failed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => f.write_str("run time reached"),
            StopReason::MaxLines => f.write_str("line limit reached"),
            StopReason::Timeout => f.write_str("timed out"),
            StopReason::Interrupted => f.write_str("interrupted"),
            StopReason::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Lines in the frame buffer when the scan ended
    pub lines: u64,

    /// Scan time reported by the engine (seconds, pauses excluded)
    pub elapsed_time: f64,

    /// Wall time of the whole pipeline run
    pub duration: Duration,

    /// Snapshots handed to the dispatcher
    pub snapshots_forwarded: u64,

    /// Snapshots dropped because the dispatcher queue was full
    pub snapshots_dropped: u64,

    /// Number of configured sinks
    pub active_sinks: usize,

    /// Number of sampler input channels
    pub channels: usize,

    pub stop_reason: Option<StopReason>,

    /// Files written by the final save
    pub saved_files: Vec<PathBuf>,

    /// Final session values, written back to the config
    pub parameters: Option<ScanParameters>,
    pub cw: Option<CwParameters>,

    /// Snapshot stream aggregator
    pub scan_metrics: ScanMetricsAggregator,

    /// Dispatcher totals, `None` if it did not shut down cleanly
    pub dispatch: Option<DispatchSummary>,
}

impl PipelineStats {
    /// Lines per second of scan time
    pub fn line_rate(&self) -> f64 {
        if self.elapsed_time > 0.0 {
            self.lines as f64 / self.elapsed_time
        } else {
            0.0
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.stop_reason {
            Some(StopReason::Failed(message)) => Some(message),
            _ => None,
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Scan Statistics                         ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        if let Some(reason) = &self.stop_reason {
            println!("   ├─ Result: {}", reason);
        }
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Scan time: {:.2}s", self.elapsed_time);
        println!("   ├─ Lines: {}", self.lines);
        println!("   ├─ Lines/s: {:.2}", self.line_rate());
        println!("   ├─ Channels: {}", self.channels);
        println!("   └─ Active sinks: {}", self.active_sinks);

        let summary = self.scan_metrics.summary();

        println!("\n📈 Engine Metrics");
        println!(
            "   ├─ Snapshots: {} forwarded, {} dropped, {} skipped",
            self.snapshots_forwarded, self.snapshots_dropped, summary.skipped_snapshots
        );
        if let Some(dispatch) = &self.dispatch {
            println!(
                "   ├─ Dispatched: {} of {} ({} stale)",
                dispatch.dispatched, dispatch.received, dispatch.stale
            );
        }
        println!("   ├─ Buffer expansions: {}", summary.buffer_growths);
        println!("   └─ Line duration (s): {}", summary.line_duration_s);

        if !self.saved_files.is_empty() {
            println!("\n💾 Saved Files");
            for (i, path) in self.saved_files.iter().enumerate() {
                let prefix = if i == self.saved_files.len() - 1 { "└─" } else { "├─" };
                println!("   {} {}", prefix, path.display());
            }
        }

        if !summary.failures.is_empty() {
            println!("\n⚠️  Failures");
            for failure in &summary.failures {
                println!("   ├─ {}", failure);
            }
        }

        println!();
    }
}
