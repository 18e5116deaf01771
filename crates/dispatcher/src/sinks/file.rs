//! FileSink - writes scan progress to disk

use contracts::{ContractError, DataSink, ScanSnapshot};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument};

use crate::export::{self, MetaValue};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Base output directory
    pub base_path: PathBuf,
    /// Also write every snapshot as one JSON line
    pub snapshots: bool,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./odmr_data"));
        let snapshots = params
            .get("snapshots")
            .is_some_and(|v| matches!(v.as_str(), "true" | "1" | "yes"));

        Self {
            base_path,
            snapshots,
        }
    }
}

/// Sink that writes a progress table while scanning and the final signal on close
///
/// Files in `base_path`:
/// - `<name>_progress.tsv`: sequence, state, lines, elapsed time, line duration
/// - `<name>_snapshots.jsonl`: full snapshots, when enabled
/// - `<timestamp>_<name>_signal.dat`: signal of the last snapshot, written on close
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    progress: Option<BufWriter<File>>,
    snapshots: Option<BufWriter<File>>,
    latest: Option<ScanSnapshot>,
}

impl FileSink {
    /// Create a new FileSink
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;

        Ok(Self {
            name: name.into(),
            config,
            progress: None,
            snapshots: None,
            latest: None,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        let config = FileSinkConfig::from_params(params);
        Self::new(name, config)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.config
            .base_path
            .join(format!("{}_progress.tsv", self.name))
    }

    pub fn snapshots_path(&self) -> PathBuf {
        self.config
            .base_path
            .join(format!("{}_snapshots.jsonl", self.name))
    }

    fn open_append(path: &Path) -> std::io::Result<(BufWriter<File>, bool)> {
        let fresh = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok((BufWriter::new(file), fresh))
    }

    fn write_snapshot_to_disk(&mut self, snapshot: &ScanSnapshot) -> std::io::Result<()> {
        if self.progress.is_none() {
            let (mut writer, fresh) = Self::open_append(&self.progress_path())?;
            if fresh {
                writeln!(writer, "sequence\tstate\tlines\telapsed_s\tline_s")?;
            }
            self.progress = Some(writer);
        }
        if let Some(writer) = self.progress.as_mut() {
            writeln!(
                writer,
                "{}\t{}\t{}\t{:.6}\t{}",
                snapshot.sequence,
                snapshot.state,
                snapshot.elapsed_lines,
                snapshot.elapsed_time,
                snapshot
                    .last_line_duration
                    .map(|d| format!("{d:.6}"))
                    .unwrap_or_default()
            )?;
        }

        if self.config.snapshots {
            if self.snapshots.is_none() {
                let (writer, _) = Self::open_append(&self.snapshots_path())?;
                self.snapshots = Some(writer);
            }
            if let Some(writer) = self.snapshots.as_mut() {
                serde_json::to_writer(&mut *writer, snapshot)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                writeln!(writer)?;
            }
        }

        Ok(())
    }

    fn persist_snapshot(&mut self, snapshot: &ScanSnapshot) -> Result<(), ContractError> {
        self.write_snapshot_to_disk(snapshot).map_err(|e| {
            error!(sink = %self.name, sequence = snapshot.sequence, error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })?;
        self.latest = Some(snapshot.clone());
        Ok(())
    }

    fn flush_writers(&mut self) -> std::io::Result<()> {
        for writer in [self.progress.as_mut(), self.snapshots.as_mut()]
            .into_iter()
            .flatten()
        {
            writer.flush()?;
        }
        Ok(())
    }

    fn save_signal(&self, snapshot: &ScanSnapshot) -> Result<Option<PathBuf>, ContractError> {
        if snapshot.elapsed_lines == 0 {
            return Ok(None);
        }
        let metadata = vec![
            (
                "Approx. Run Time (s)".to_string(),
                MetaValue::Float(snapshot.elapsed_time),
            ),
            (
                "Number of Frequency Sweeps (#)".to_string(),
                MetaValue::Int(snapshot.elapsed_lines),
            ),
            ("Final State".to_string(), MetaValue::Text(snapshot.state.to_string())),
        ];
        let table = export::signal_table(
            &snapshot.frequency_data,
            &snapshot.signal_data,
            &snapshot.channel_units,
            metadata,
        );
        table
            .save(
                &self.config.base_path,
                &format!("{}_signal", self.name),
                chrono::Local::now(),
            )
            .map(Some)
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))
    }
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, snapshot),
        fields(sink = %self.name, sequence = snapshot.sequence)
    )]
    async fn write(&mut self, snapshot: &ScanSnapshot) -> Result<(), ContractError> {
        self.persist_snapshot(snapshot)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.flush_writers()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.flush_writers()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        self.progress = None;
        self.snapshots = None;

        if let Some(snapshot) = self.latest.take() {
            if let Some(path) = self.save_signal(&snapshot)? {
                info!(sink = %self.name, path = %path.display(), "Signal saved");
            }
        }
        debug!(sink = %self.name, "FileSink closed");
        Ok(())
    }
}
