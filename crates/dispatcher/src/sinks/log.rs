//! LogSink - logs snapshot summary via tracing

use contracts::{ContractError, DataSink, ScanSnapshot, ScanState};
use tracing::{debug, info, instrument, warn};

/// Sink that logs scan progress
///
/// State changes and failures are logged at info/warn, individual lines at debug.
pub struct LogSink {
    name: String,
    last_state: Option<ScanState>,
    last_failure: Option<String>,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_state: None,
            last_failure: None,
        }
    }

    fn log_snapshot_summary(&mut self, snapshot: &ScanSnapshot) {
        if self.last_state != Some(snapshot.state) {
            info!(
                sink = %self.name,
                sequence = snapshot.sequence,
                state = %snapshot.state,
                lines = snapshot.elapsed_lines,
                elapsed_s = snapshot.elapsed_time,
                "Scan state changed"
            );
            self.last_state = Some(snapshot.state);
        }

        if snapshot.failure != self.last_failure {
            if let Some(failure) = &snapshot.failure {
                warn!(sink = %self.name, failure = %failure, "Scan failed");
            }
            self.last_failure = snapshot.failure.clone();
        }

        debug!(
            sink = %self.name,
            sequence = snapshot.sequence,
            lines = snapshot.elapsed_lines,
            capacity = snapshot.buffer_capacity,
            line_s = snapshot.last_line_duration,
            "Snapshot received"
        );
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, snapshot),
        fields(sink = %self.name, sequence = snapshot.sequence)
    )]
    async fn write(&mut self, snapshot: &ScanSnapshot) -> Result<(), ContractError> {
        self.log_snapshot_summary(snapshot);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
