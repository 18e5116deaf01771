//! Sink metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Total successful writes
    write_count: AtomicU64,
    /// Total write failures
    failure_count: AtomicU64,
    /// Progress snapshots superseded by a newer one before being written
    coalesced_count: AtomicU64,
    /// Terminal snapshots refused by `try_send` on a full queue
    dropped_count: AtomicU64,
    /// Sequence number of the last snapshot written
    last_sequence: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Count a successful write of snapshot `sequence`
    pub fn record_write(&self, sequence: u64) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.last_sequence.fetch_max(sequence, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn coalesced_count(&self) -> u64 {
        self.coalesced_count.load(Ordering::Relaxed)
    }

    pub fn add_coalesced(&self, count: u64) {
        self.coalesced_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            coalesced_count: self.coalesced_count(),
            dropped_count: self.dropped_count(),
            last_sequence: self.last_sequence(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub coalesced_count: u64,
    pub dropped_count: u64,
    pub last_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_sequence_never_goes_back() {
        let metrics = SinkMetrics::new();
        metrics.record_write(5);
        metrics.record_write(3);
        let snap = metrics.snapshot();
        assert_eq!(snap.write_count, 2);
        assert_eq!(snap.last_sequence, 5);
    }
}
