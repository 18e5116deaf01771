//! Pipeline orchestrator - coordinates all components.
//!
//! Devices, engine and dispatcher are built from one blueprint. Engine
//! snapshots are forwarded to the dispatcher without ever blocking the
//! acquisition task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{ScanBlueprint, ScanSnapshot, ScanState};
use instruments::{DeviceFactory, DummyMicrowave, DummySampler};
use observability::record_snapshot_metrics;
use scan_engine::{EngineOptions, ScanEngine};
use dispatcher::DispatchSummary;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{PipelineStats, StopReason};
use crate::error::CliError;

type Engine = ScanEngine<DummyMicrowave, DummySampler>;

/// How long sinks get to drain and close after the scan ends
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the dispatcher to close its sinks; `None` if it timed out or panicked
async fn join_dispatcher(
    handle: JoinHandle<DispatchSummary>,
    wait: Duration,
) -> Option<DispatchSummary> {
    match tokio::time::timeout(wait, handle).await {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(e)) => {
            warn!(error = %e, "Dispatcher task failed, sinks may not be closed");
            None
        }
        Err(_) => {
            warn!(
                timeout_secs = wait.as_secs_f64(),
                "Dispatcher did not finish in time, sinks may not be closed"
            );
            None
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The scan blueprint (CLI overrides already applied)
    pub blueprint: ScanBlueprint,

    /// Stop after this many lines (None = run time decides)
    pub max_lines: Option<u64>,

    /// Wall clock timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Snapshot queue size towards the dispatcher
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Where to save scan data (None = do not save)
    pub save_dir: Option<PathBuf>,

    /// Name tag for saved files
    pub tag: Option<String>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Build the scan engine on simulated devices
    pub fn build_engine(blueprint: &ScanBlueprint) -> Result<Engine> {
        let devices = DeviceFactory::from_blueprint(blueprint)
            .map_err(|e| CliError::device_setup(e.to_string()))?;
        let engine = ScanEngine::new(
            Arc::new(devices.microwave),
            Arc::new(devices.sampler),
            EngineOptions::from_blueprint(blueprint),
        )
        .map_err(|e| CliError::device_setup(e.to_string()))?;
        Ok(engine)
    }

    /// Run one scan until it ends, a limit is hit or `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: std::future::Future<Output = ()>,
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let engine = Self::build_engine(blueprint)?;

        // Setup Dispatcher
        let (snapshot_tx, snapshot_rx) = mpsc::channel::<ScanSnapshot>(self.config.buffer_size.max(1));
        if blueprint.sinks.is_empty() {
            warn!("No sinks configured - snapshots are only used for the summary");
        }
        let dispatcher = dispatcher::create_dispatcher(blueprint.sinks.clone(), snapshot_rx)
            .await
            .context("Failed to create dispatcher")?;
        let dispatcher_handle = dispatcher.spawn();

        let mut stats = PipelineStats {
            active_sinks: blueprint.sinks.len(),
            channels: engine.snapshot().channel_units.len(),
            ..Default::default()
        };

        let mut status = engine.subscribe();
        engine
            .start_scan()
            .await
            .context("Failed to start scan")?;
        info!(
            max_lines = ?self.config.max_lines,
            timeout = ?self.config.timeout,
            "Scan running"
        );

        let mut shutdown = std::pin::pin!(shutdown);
        let mut deadline =
            std::pin::pin!(tokio::time::sleep(self.config.timeout.unwrap_or_default()));
        let mut stopping = false;

        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = status.borrow_and_update().clone();
                    record_snapshot_metrics(&snapshot);
                    stats.scan_metrics.update(&snapshot);

                    let state = snapshot.state;
                    let lines = snapshot.elapsed_lines;
                    let failure = snapshot.failure.clone();
                    Self::forward(&snapshot_tx, snapshot, &mut stats);

                    if state != ScanState::Scanning {
                        if let Some(message) = failure {
                            stats.stop_reason.get_or_insert(StopReason::Failed(message));
                        }
                        break;
                    }
                    if let Some(max) = self.config.max_lines {
                        if lines >= max && !stopping {
                            info!(lines, "Reached max lines limit");
                            stats.stop_reason = Some(StopReason::MaxLines);
                            stopping = true;
                            Self::stop(&engine).await;
                        }
                    }
                }
                _ = &mut deadline, if self.config.timeout.is_some() && !stopping => {
                    warn!(timeout_secs = ?self.config.timeout.map(|t| t.as_secs_f64()), "Scan timed out");
                    stats.stop_reason = Some(StopReason::Timeout);
                    stopping = true;
                    Self::stop(&engine).await;
                }
                _ = &mut shutdown, if !stopping => {
                    warn!("Received shutdown signal, stopping scan...");
                    stats.stop_reason = Some(StopReason::Interrupted);
                    stopping = true;
                    Self::stop(&engine).await;
                }
            }
        }

        // Shutdown
        drop(snapshot_tx);
        stats.dispatch = join_dispatcher(dispatcher_handle, DISPATCHER_DRAIN_TIMEOUT).await;

        let final_snapshot = engine.snapshot();
        stats.stop_reason.get_or_insert(StopReason::Completed);
        stats.lines = final_snapshot.elapsed_lines;
        stats.elapsed_time = final_snapshot.elapsed_time;
        stats.parameters = Some(engine.scan_parameters().await);
        stats.cw = Some(engine.cw_parameters().await);

        if let Some(dir) = &self.config.save_dir {
            if final_snapshot.elapsed_lines > 0 {
                let record = engine.record().await.context("Failed to collect scan data")?;
                stats.saved_files = dispatcher::save_record(dir, self.config.tag.as_deref(), &record)
                    .context("Failed to save scan data")?;
            } else {
                warn!("No lines acquired, nothing to save");
            }
        }

        stats.duration = start_time.elapsed();
        info!(
            lines = stats.lines,
            duration_secs = stats.duration.as_secs_f64(),
            lines_per_sec = format!("{:.2}", stats.line_rate()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }

    fn forward(tx: &mpsc::Sender<ScanSnapshot>, snapshot: ScanSnapshot, stats: &mut PipelineStats) {
        match tx.try_send(snapshot) {
            Ok(()) => stats.snapshots_forwarded += 1,
            Err(mpsc::error::TrySendError::Full(s)) => {
                stats.snapshots_dropped += 1;
                warn!(sequence = s.sequence, "Dispatcher queue full, snapshot dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Dispatcher channel closed");
            }
        }
    }

    async fn stop(engine: &Engine) {
        if let Err(e) = engine.stop_scan().await {
            warn!(error = %e, "Error while stopping scan");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::FrequencyRange;
    use tempfile::tempdir;

    fn fast_blueprint() -> ScanBlueprint {
        let mut blueprint = ScanBlueprint::default();
        blueprint.scan.frequency_ranges = vec![FrequencyRange::new(2.8e9, 2.9e9, 10)];
        blueprint.scan.data_rate = 1000.0;
        blueprint.scan.run_time = 1.0;
        blueprint.sampler.seed = Some(3);
        blueprint
    }

    fn config(blueprint: ScanBlueprint) -> PipelineConfig {
        PipelineConfig {
            blueprint,
            max_lines: None,
            timeout: None,
            buffer_size: 16,
            metrics_port: None,
            save_dir: None,
            tag: None,
        }
    }

    #[tokio::test]
    async fn test_pipeline_stops_at_max_lines_and_saves() {
        let dir = tempdir().unwrap();
        let mut config = config(fast_blueprint());
        config.max_lines = Some(3);
        config.save_dir = Some(dir.path().to_path_buf());
        config.tag = Some("test".into());

        let stats = Pipeline::new(config)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.stop_reason, Some(StopReason::MaxLines));
        assert!(stats.lines >= 3);
        // two raw files and one signal file
        assert_eq!(stats.saved_files.len(), 3);
        assert!(stats.saved_files.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_pipeline_shutdown_signal_stops_scan() {
        let mut blueprint = fast_blueprint();
        blueprint.scan.run_time = 30.0;

        let stats = Pipeline::new(config(blueprint))
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert_eq!(stats.stop_reason, Some(StopReason::Interrupted));
        assert!(stats.duration < Duration::from_secs(10));
        assert!(stats.parameters.is_some());
    }

    #[tokio::test]
    async fn test_pipeline_runs_to_completion() {
        let stats = Pipeline::new(config(fast_blueprint()))
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.stop_reason, Some(StopReason::Completed));
        assert!(stats.elapsed_time >= 1.0);
        assert!(stats.lines > 0);
        // no sinks configured, the dispatcher still drains and reports
        let dispatch = stats.dispatch.unwrap();
        assert!(dispatch.received > 0);
    }

    #[tokio::test]
    async fn test_join_dispatcher_reports_outcome() {
        let done: JoinHandle<DispatchSummary> = tokio::spawn(async {
            DispatchSummary {
                received: 4,
                ..Default::default()
            }
        });
        let summary = join_dispatcher(done, Duration::from_secs(1)).await;
        assert_eq!(summary.map(|s| s.received), Some(4));

        let panicked: JoinHandle<DispatchSummary> =
            tokio::spawn(async { panic!("sink worker exploded") });
        assert!(join_dispatcher(panicked, Duration::from_secs(1)).await.is_none());

        let stuck: JoinHandle<DispatchSummary> = tokio::spawn(std::future::pending());
        assert!(join_dispatcher(stuck, Duration::from_millis(20)).await.is_none());
    }
}
