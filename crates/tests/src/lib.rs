//! # Integration Tests
//!
//! Integration and end-to-end tests.
//!
//! Covers:
//! - Config round trips through the loader
//! - Simulated e2e scans (config -> devices -> engine -> dispatcher -> export)
//! - Failure propagation from the devices to the sinks

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{FrequencyRange, ScanBlueprint};

    #[test]
    fn test_blueprint_toml_round_trip() {
        let mut blueprint = ScanBlueprint::default();
        blueprint.scan.frequency_ranges = vec![
            FrequencyRange::new(2.80e9, 2.84e9, 21),
            FrequencyRange::new(2.90e9, 2.94e9, 21),
        ];
        blueprint.sampler.seed = Some(5);

        let text = ConfigLoader::to_toml(&blueprint).unwrap();
        let parsed = ConfigLoader::load_from_str(&text, ConfigFormat::Toml).unwrap();

        assert_eq!(parsed.scan.frequency_ranges, blueprint.scan.frequency_ranges);
        assert_eq!(parsed.sampler.seed, Some(5));
        assert_eq!(
            parsed.sampler.input_channel_units,
            blueprint.sampler.input_channel_units
        );
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ScanBlueprint, ScanSnapshot, ScanState};
    use dispatcher::{create_dispatcher, save_record};
    use instruments::{DeviceFactory, DummyMicrowave, DummySampler, SamplerFault};
    use observability::ScanMetricsAggregator;
    use scan_engine::{EngineOptions, ScanEngine};
    use tokio::sync::{mpsc, watch};

    type Engine = ScanEngine<DummyMicrowave, DummySampler>;

    struct Rig {
        engine: Engine,
        sampler: Arc<DummySampler>,
    }

    fn config(data_dir: &Path, run_time: f64) -> ScanBlueprint {
        let text = format!(
            r#"
[scan]
frequency_ranges = [
    {{ start = 2.80e9, stop = 2.84e9, points = 8 }},
    {{ start = 2.90e9, stop = 2.94e9, points = 4 }},
]
data_rate = 1000.0
run_time = {run_time:?}

[engine]
data_dir = "{dir}"

[sampler]
seed = 7

[[sinks]]
name = "progress"
sink_type = "file"
params = {{ base_path = "{dir}" }}

[[sinks]]
name = "console"
sink_type = "log"
"#,
            dir = data_dir.display()
        );
        ConfigLoader::load_from_str(&text, ConfigFormat::Toml).unwrap()
    }

    fn rig(blueprint: &ScanBlueprint) -> Rig {
        let pair = DeviceFactory::from_blueprint(blueprint).unwrap();
        let microwave = Arc::new(pair.microwave);
        let sampler = Arc::new(pair.sampler);
        let engine = ScanEngine::new(
            microwave,
            Arc::clone(&sampler),
            EngineOptions::from_blueprint(blueprint),
        )
        .unwrap();
        Rig { engine, sampler }
    }

    /// Forward every observed snapshot until the engine leaves `Scanning`
    async fn forward_until_done(
        mut rx: watch::Receiver<ScanSnapshot>,
        tx: mpsc::Sender<ScanSnapshot>,
    ) -> ScanMetricsAggregator {
        let mut aggregator = ScanMetricsAggregator::new();
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let snapshot = rx.borrow_and_update().clone();
            aggregator.update(&snapshot);
            let done = snapshot.state != ScanState::Scanning;
            tx.send(snapshot).await.unwrap();
            if done {
                break;
            }
        }
        aggregator
    }

    /// End-to-end: config -> dummy devices -> engine -> dispatcher -> export
    #[tokio::test]
    async fn test_e2e_scan_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = config(dir.path(), 1.0);
        let rig = rig(&blueprint);

        let (tx, rx) = mpsc::channel(256);
        let dispatcher = create_dispatcher(blueprint.sinks.clone(), rx).await.unwrap();
        assert_eq!(dispatcher.metrics().len(), 2);
        let dispatcher_handle = dispatcher.spawn();

        let forward = tokio::spawn(forward_until_done(rig.engine.subscribe(), tx));
        rig.engine.start_scan().await.unwrap();

        let aggregator = tokio::time::timeout(Duration::from_secs(10), forward)
            .await
            .expect("scan did not finish")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), dispatcher_handle)
            .await
            .unwrap()
            .unwrap();

        let done = rig.engine.snapshot();
        assert_eq!(done.state, ScanState::Idle);
        assert!(done.failure.is_none());
        assert!(done.elapsed_lines > 1);
        assert_eq!(aggregator.total_lines, done.elapsed_lines);
        assert!(aggregator.failures.is_empty());

        // two ranges, split the same way in every view
        assert_eq!(done.frequency_data.len(), 2);
        assert_eq!(done.frequency_data[0].len(), 8);
        assert_eq!(done.signal_data["APD counts"][1].len(), 4);

        // sink output
        let progress = fs::read_to_string(dir.path().join("progress_progress.tsv")).unwrap();
        assert!(progress.lines().count() > 1);

        // export
        let record = rig.engine.record().await.unwrap();
        let paths = save_record(&blueprint.engine.data_dir, Some("e2e"), &record).unwrap();
        assert_eq!(paths.len(), 3);
        let raw = fs::read_to_string(&paths[0]).unwrap();
        let row = raw.lines().find(|l| !l.starts_with('#')).unwrap();
        assert_eq!(row.split('\t').count(), 1 + done.elapsed_lines as usize);
        let signal = fs::read_to_string(&paths[2]).unwrap();
        assert_eq!(signal.lines().filter(|l| !l.starts_with('#')).count(), 12);
    }

    /// A sampler failure ends the scan and reaches the sinks as a failure snapshot
    #[tokio::test]
    async fn test_acquisition_failure_reaches_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = config(dir.path(), 30.0);
        let rig = rig(&blueprint);

        let (tx, rx) = mpsc::channel(256);
        let dispatcher = create_dispatcher(blueprint.sinks.clone(), rx).await.unwrap();
        let dispatcher_handle = dispatcher.spawn();

        rig.sampler.inject_fault(SamplerFault::Fail);
        let forward = tokio::spawn(forward_until_done(rig.engine.subscribe(), tx));
        rig.engine.start_scan().await.unwrap();

        let aggregator = tokio::time::timeout(Duration::from_secs(10), forward)
            .await
            .expect("failure did not end the scan")
            .unwrap();
        dispatcher_handle.await.unwrap();

        assert_eq!(aggregator.failures.len(), 1);
        assert_eq!(rig.engine.state(), ScanState::Idle);
        assert!(rig.engine.last_error().is_some());

        // no lines, so the file sink writes no signal table
        let signal_files = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with("_signal.dat"))
            .count();
        assert_eq!(signal_files, 0);
    }

    /// Pausing freezes the data, continuing appends to it
    #[tokio::test]
    async fn test_pause_and_continue_through_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = config(dir.path(), 30.0);
        let rig = rig(&blueprint);
        let mut rx = rig.engine.subscribe();

        rig.engine.start_scan().await.unwrap();
        rx.wait_for(|s| s.elapsed_lines >= 3).await.unwrap();
        rig.engine.pause_scan().await.unwrap();
        let paused = rig.engine.snapshot();
        assert_eq!(paused.state, ScanState::Paused);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rig.engine.elapsed_lines(), paused.elapsed_lines);

        rig.engine.continue_scan().await.unwrap();
        rx.wait_for(|s| s.elapsed_lines >= paused.elapsed_lines + 3)
            .await
            .unwrap();
        rig.engine.stop_scan().await.unwrap();

        let record = rig.engine.record().await.unwrap();
        let lines = record.raw_data["APD counts"][0][0].len() as u64;
        assert_eq!(lines, record.metadata.elapsed_lines);
        assert!(lines >= paused.elapsed_lines + 3);
    }

    /// Final session values survive a restart through the config file
    #[tokio::test]
    async fn test_session_values_persist_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.toml");
        let mut blueprint = config(dir.path(), 5.0);

        let first = rig(&blueprint);
        first.engine.set_run_time(12.0).await.unwrap();
        first.engine.set_scans_to_average(4).await;
        first.engine.set_cw_parameters(2.88e9, -5.0).await.unwrap();
        blueprint.record_session(
            &first.engine.scan_parameters().await,
            first.engine.cw_parameters().await,
        );
        ConfigLoader::save_to_path(&blueprint, &path).unwrap();

        let reloaded = ConfigLoader::load_from_path(&path).unwrap();
        let second = rig(&reloaded);
        let params = second.engine.scan_parameters().await;
        assert_eq!(params.run_time, 12.0);
        assert_eq!(params.scans_to_average, 4);
        assert_eq!(params.frequency_ranges.len(), 2);
        assert_eq!(second.engine.cw_parameters().await.frequency, 2.88e9);
    }
}
