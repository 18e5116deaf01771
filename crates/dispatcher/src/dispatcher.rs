//! Dispatcher - fans scan snapshots out to the configured sinks
//!
//! Progress snapshots are best effort: a full sink queue drops them. A snapshot
//! that ends a scan (state left `Scanning`, or a failure is attached) is queued
//! with back-pressure so every sink sees how the scan ended.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use contracts::{ScanSnapshot, ScanState, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub sinks: Vec<SinkConfig>,
    /// Log a progress line every N received snapshots (0 = never)
    pub progress_every: u64,
}

impl DispatcherConfig {
    pub fn new(sinks: Vec<SinkConfig>) -> Self {
        Self {
            sinks,
            progress_every: 100,
        }
    }
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    input_rx: mpsc::Receiver<ScanSnapshot>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig, input_rx: mpsc::Receiver<ScanSnapshot>) -> Self {
        Self { config, input_rx }
    }

    /// Create one sink worker per configured sink
    ///
    /// Fails on the first sink that cannot be created; workers already
    /// spawned for earlier sinks are shut down again.
    #[instrument(
        name = "dispatcher_build",
        skip(self),
        fields(sink_count = self.config.sinks.len())
    )]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.config.sinks.len());
        for sink_config in &self.config.sinks {
            match create_sink_handle(sink_config) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    shutdown_handles(handles).await;
                    return Err(e);
                }
            }
        }

        let mut dispatcher = Dispatcher::with_handles(handles, self.input_rx);
        dispatcher.progress_every = self.config.progress_every;
        Ok(dispatcher)
    }
}

fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    debug!(sink = %config.name, sink_type = ?config.sink_type, "Creating sink");
    match config.sink_type {
        SinkType::Log => Ok(SinkHandle::spawn(
            LogSink::new(&config.name),
            config.queue_capacity,
        )),
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

async fn shutdown_handles(handles: Vec<SinkHandle>) {
    for handle in handles {
        handle.shutdown().await;
    }
}

/// What the dispatcher saw over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub received: u64,
    /// Snapshots handed to the sinks
    pub dispatched: u64,
    /// Snapshots not newer than one already dispatched
    pub stale: u64,
    pub state_changes: u64,
}

/// Fans scan snapshots out to sinks
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<ScanSnapshot>,
    progress_every: u64,
    last_sequence: Option<u64>,
    last_state: Option<ScanState>,
    summary: DispatchSummary,
}

impl Dispatcher {
    /// Create a dispatcher over already running sink workers
    pub fn with_handles(handles: Vec<SinkHandle>, input_rx: mpsc::Receiver<ScanSnapshot>) -> Self {
        Self {
            handles,
            input_rx,
            progress_every: 100,
            last_sequence: None,
            last_state: None,
            summary: DispatchSummary::default(),
        }
    }

    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Dispatch until the input channel closes, then close every sink
    #[instrument(name = "dispatcher_run", skip(self), fields(sinks = self.handles.len()))]
    pub async fn run(mut self) -> DispatchSummary {
        info!(sinks = self.handles.len(), "Dispatcher started");

        while let Some(snapshot) = self.input_rx.recv().await {
            self.summary.received += 1;
            self.dispatch(snapshot).await;

            if self.progress_every > 0 && self.summary.received % self.progress_every == 0 {
                debug!(
                    received = self.summary.received,
                    last_sequence = ?self.last_sequence,
                    "Dispatcher progress"
                );
            }
        }

        let summary = self.summary;
        info!(
            received = summary.received,
            dispatched = summary.dispatched,
            stale = summary.stale,
            "Dispatcher input closed, shutting down"
        );
        shutdown_handles(self.handles).await;
        summary
    }

    pub fn spawn(self) -> JoinHandle<DispatchSummary> {
        tokio::spawn(self.run())
    }

    async fn dispatch(&mut self, snapshot: ScanSnapshot) {
        if self.last_sequence.is_some_and(|last| snapshot.sequence <= last) {
            self.summary.stale += 1;
            return;
        }
        self.last_sequence = Some(snapshot.sequence);

        if self.last_state != Some(snapshot.state) {
            if let Some(previous) = self.last_state {
                info!(from = ?previous, to = ?snapshot.state, sequence = snapshot.sequence, "Scan state changed");
                self.summary.state_changes += 1;
            }
            self.last_state = Some(snapshot.state);
        }

        for handle in &self.handles {
            if snapshot.is_progress() {
                handle.try_send(snapshot.clone());
            } else {
                handle.send(snapshot.clone()).await;
            }
        }
        self.summary.dispatched += 1;
    }
}

/// Create a dispatcher from sink configs
pub async fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    input_rx: mpsc::Receiver<ScanSnapshot>,
) -> Result<Dispatcher, DispatcherError> {
    DispatcherBuilder::new(DispatcherConfig::new(sink_configs), input_rx)
        .build()
        .await
}
