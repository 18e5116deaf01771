//! SinkHandle - one sink behind its own queue and worker task
//!
//! Progress snapshots are coalesced: a sink that falls behind sees the newest
//! mid-scan state instead of every intermediate one. Snapshots that change or
//! end a scan are always written, in sequence order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use contracts::{DataSink, ScanSnapshot};

use crate::metrics::SinkMetrics;

/// Newest progress snapshot that did not fit into the queue
type LatestSlot = Arc<Mutex<Option<ScanSnapshot>>>;

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<ScanSnapshot>,
    latest: LatestSlot,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Create a new SinkHandle and spawn the worker task
    pub fn spawn<S: DataSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let latest: LatestSlot = Arc::default();
        let metrics = Arc::new(SinkMetrics::new());

        let worker = SinkWorker {
            rx,
            latest: Arc::clone(&latest),
            metrics: Arc::clone(&metrics),
            name: name.clone(),
            last_written: None,
        };
        let worker_handle = tokio::spawn(worker.run(sink));

        Self {
            name,
            tx,
            latest,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue a snapshot without waiting.
    ///
    /// On a full queue a progress snapshot is parked as the newest pending
    /// one, replacing any older parked snapshot. Any other snapshot is refused
    /// and must go through [`SinkHandle::send`]. Returns false when the
    /// snapshot was refused or the worker is gone.
    pub fn try_send(&self, snapshot: ScanSnapshot) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(s)) if s.is_progress() => {
                self.park(s);
                true
            }
            Err(mpsc::error::TrySendError::Full(s)) => {
                self.metrics.inc_dropped_count();
                warn!(
                    sink = %self.name,
                    sequence = s.sequence,
                    state = ?s.state,
                    "Queue full, state change refused"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "Sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Queue a snapshot, waiting for room
    ///
    /// For snapshots a sink must not miss, e.g. the final state of a scan.
    pub async fn send(&self, snapshot: ScanSnapshot) -> bool {
        match self.tx.send(snapshot).await {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(_) => {
                error!(sink = %self.name, "Sink worker closed unexpectedly");
                false
            }
        }
    }

    fn park(&self, snapshot: ScanSnapshot) {
        let mut slot = lock(&self.latest);
        let newer = slot
            .as_ref()
            .map_or(true, |held| held.sequence < snapshot.sequence);
        if !newer {
            self.metrics.add_coalesced(1);
            return;
        }
        trace!(sink = %self.name, sequence = snapshot.sequence, "Progress parked");
        if slot.replace(snapshot).is_some() {
            self.metrics.add_coalesced(1);
        }
    }

    /// Shutdown the sink worker gracefully
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.name, "SinkHandle shutdown complete");
    }
}

fn lock(slot: &LatestSlot) -> MutexGuard<'_, Option<ScanSnapshot>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SinkWorker {
    rx: mpsc::Receiver<ScanSnapshot>,
    latest: LatestSlot,
    metrics: Arc<SinkMetrics>,
    name: String,
    last_written: Option<u64>,
}

impl SinkWorker {
    /// Write queued snapshots batch by batch, then flush and close the sink
    #[instrument(name = "sink_worker_loop", skip_all, fields(sink = %self.name))]
    async fn run<S: DataSink>(mut self, mut sink: S) {
        debug!("Sink worker started");

        while let Some(first) = self.rx.recv().await {
            // the parked snapshot is taken before draining so that every
            // queued snapshot older than it lands in this batch
            let mut batch = Vec::with_capacity(self.rx.len() + 2);
            batch.push(first);
            batch.extend(self.take_parked());
            while let Ok(snapshot) = self.rx.try_recv() {
                batch.push(snapshot);
            }
            self.metrics.set_queue_len(self.rx.len());

            let (batch, superseded) = coalesce(batch);
            if superseded > 0 {
                trace!(superseded, "Progress coalesced");
                self.metrics.add_coalesced(superseded);
            }
            for snapshot in &batch {
                self.write(&mut sink, snapshot).await;
            }
        }

        if let Some(snapshot) = self.take_parked() {
            self.write(&mut sink, &snapshot).await;
        }

        if let Err(e) = sink.flush().await {
            error!(error = %e, "Flush failed on shutdown");
        }
        if let Err(e) = sink.close().await {
            error!(error = %e, "Close failed on shutdown");
        }

        debug!("Sink worker stopped");
    }

    /// Parked progress, unless something newer was already written
    fn take_parked(&self) -> Option<ScanSnapshot> {
        let parked = lock(&self.latest).take()?;
        if self.last_written.is_some_and(|last| parked.sequence <= last) {
            self.metrics.add_coalesced(1);
            return None;
        }
        Some(parked)
    }

    async fn write<S: DataSink>(&mut self, sink: &mut S, snapshot: &ScanSnapshot) {
        self.last_written = Some(snapshot.sequence);
        match sink.write(snapshot).await {
            Ok(()) => self.metrics.record_write(snapshot.sequence),
            Err(e) => {
                self.metrics.inc_failure_count();
                error!(sequence = snapshot.sequence, error = %e, "Write failed");
            }
        }
    }
}

/// Sort a batch by sequence and drop each progress snapshot followed by
/// another progress snapshot. Returns the kept snapshots and the drop count.
fn coalesce(mut batch: Vec<ScanSnapshot>) -> (Vec<ScanSnapshot>, u64) {
    batch.sort_by_key(|s| s.sequence);
    let total = batch.len();

    let mut kept = Vec::with_capacity(total);
    let mut iter = batch.into_iter().peekable();
    while let Some(snapshot) = iter.next() {
        let superseded =
            snapshot.is_progress() && iter.peek().is_some_and(ScanSnapshot::is_progress);
        if !superseded {
            kept.push(snapshot);
        }
    }

    let dropped = (total - kept.len()) as u64;
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractError, ScanState};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::{sleep, Duration};

    struct MockSink {
        name: String,
        written: Arc<Mutex<Vec<u64>>>,
        closed: Arc<AtomicBool>,
        should_fail: bool,
        delay_ms: u64,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                written: Arc::default(),
                closed: Arc::new(AtomicBool::new(false)),
                should_fail: false,
                delay_ms: 0,
            }
        }
    }

    impl DataSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, snapshot: &ScanSnapshot) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            self.written.lock().unwrap().push(snapshot.sequence);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn snapshot(sequence: u64, state: ScanState) -> ScanSnapshot {
        ScanSnapshot {
            sequence,
            state,
            elapsed_lines: sequence,
            ..Default::default()
        }
    }

    fn progress(sequence: u64) -> ScanSnapshot {
        snapshot(sequence, ScanState::Scanning)
    }

    #[test]
    fn test_coalesce_keeps_latest_progress_and_state_changes() {
        let mut failed = progress(6);
        failed.failure = Some("sampler timed out".to_string());
        let batch = vec![
            progress(3),
            progress(1),
            progress(2),
            snapshot(4, ScanState::Paused),
            progress(5),
            failed,
        ];

        let (kept, dropped) = coalesce(batch);
        let sequences: Vec<u64> = kept.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5, 6]);
        assert_eq!(dropped, 2);
    }

    #[tokio::test]
    async fn test_sink_handle_basic() {
        let sink = MockSink::new("test");
        let closed = Arc::clone(&sink.closed);

        let handle = SinkHandle::spawn(sink, 10);
        for i in 1..=5 {
            assert!(handle.try_send(progress(i)));
        }
        let metrics = Arc::clone(handle.metrics());

        handle.shutdown().await;
        let snap = metrics.snapshot();
        assert_eq!(snap.write_count + snap.coalesced_count, 5);
        assert_eq!(snap.last_sequence, 5);
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_full_queue_keeps_newest_progress() {
        let mut sink = MockSink::new("slow");
        sink.delay_ms = 20;
        let written = Arc::clone(&sink.written);

        let handle = SinkHandle::spawn(sink, 2);
        for i in 1..=10 {
            assert!(handle.try_send(progress(i)));
        }
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;

        let snap = metrics.snapshot();
        assert!(snap.coalesced_count > 0);
        assert_eq!(snap.dropped_count, 0);
        assert_eq!(snap.write_count + snap.coalesced_count, 10);
        assert_eq!(written.lock().unwrap().last(), Some(&10));
    }

    #[tokio::test]
    async fn test_writes_follow_sequence_order() {
        let mut sink = MockSink::new("ordered");
        sink.delay_ms = 5;
        let written = Arc::clone(&sink.written);

        let handle = SinkHandle::spawn(sink, 2);
        for i in 1..=6 {
            handle.try_send(progress(i));
        }
        assert!(handle.send(snapshot(7, ScanState::Paused)).await);
        for i in 8..=12 {
            handle.try_send(progress(i));
        }
        assert!(handle.send(snapshot(13, ScanState::Idle)).await);
        handle.shutdown().await;

        let written = written.lock().unwrap();
        assert!(written.windows(2).all(|w| w[0] < w[1]), "{written:?}");
        assert!(written.contains(&7));
        assert_eq!(written.last(), Some(&13));
    }

    #[tokio::test]
    async fn test_state_change_refused_on_full_queue() {
        let sink = MockSink::new("tiny");
        let handle = SinkHandle::spawn(sink, 1);

        // the worker has not run yet, so the single slot stays taken
        assert!(handle.try_send(progress(1)));
        assert!(!handle.try_send(snapshot(2, ScanState::Idle)));
        assert_eq!(handle.metrics().dropped_count(), 1);

        assert!(handle.send(snapshot(2, ScanState::Idle)).await);
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;
        assert_eq!(metrics.last_sequence(), 2);
    }

    #[tokio::test]
    async fn test_sink_handle_failure_isolation() {
        let mut sink = MockSink::new("failing");
        sink.should_fail = true;

        let handle = SinkHandle::spawn(sink, 10);
        for i in 1..=3 {
            handle.send(snapshot(i, ScanState::Idle)).await;
        }

        sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.metrics().failure_count(), 3);
        assert_eq!(handle.metrics().write_count(), 0);

        handle.shutdown().await;
    }
}
