//! Text export of scan data
//!
//! Tab separated columns, `.15e` numbers, `# `-prefixed header with a
//! metadata block. File names start with the save timestamp.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use contracts::{RangeData, ScanMetadata, ScanRecord};
use tracing::{info, instrument};

use crate::error::DispatcherError;

const COMMENT: &str = "# ";
const DELIMITER: char = '\t';
const EXTENSION: &str = "dat";

/// Header metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Float(f64),
    Int(u64),
    Floats(Vec<f64>),
    Ints(Vec<u64>),
    Text(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Float(v) => write!(f, "{v:.18e}"),
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Floats(values) => {
                let parts: Vec<String> = values.iter().map(|v| format!("{v:.18e}")).collect();
                write!(f, "({})", parts.join(", "))
            }
            MetaValue::Ints(values) => {
                let parts: Vec<String> = values.iter().map(u64::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
            MetaValue::Text(v) => f.write_str(v),
        }
    }
}

/// One text data file: header + numeric table
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    pub metadata: Vec<(String, MetaValue)>,
    pub column_headers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl DataTable {
    pub fn render(&self, timestamp: DateTime<Local>) -> String {
        let mut header = vec![
            format!("Saved Data on {}", timestamp.format("%d.%m.%Y at %Hh%Mm%Ss")),
            String::new(),
        ];
        if !self.metadata.is_empty() {
            header.push("Metadata:".into());
            header.push("===========".into());
            header.extend(self.metadata.iter().map(|(k, v)| format!("{k}: {v}")));
            header.push(String::new());
        }
        header.push("Data:".into());
        header.push("=====".into());
        header.push(self.column_headers.join(&DELIMITER.to_string()));

        let mut out = String::new();
        for line in header {
            out.push_str(COMMENT);
            out.push_str(&line);
            out.push('\n');
        }
        for row in &self.rows {
            let mut first = true;
            for value in row {
                if !first {
                    out.push(DELIMITER);
                }
                first = false;
                let _ = write!(out, "{value:.15e}");
            }
            out.push('\n');
        }
        out
    }

    /// Write to `dir` as `<timestamp>_<nametag>.dat`
    pub fn save(
        &self,
        dir: &Path,
        nametag: &str,
        timestamp: DateTime<Local>,
    ) -> Result<PathBuf, DispatcherError> {
        fs::create_dir_all(dir).map_err(|e| DispatcherError::export(dir, e))?;
        let path = dir.join(file_name(nametag, timestamp));
        fs::write(&path, self.render(timestamp)).map_err(|e| DispatcherError::export(&path, e))?;
        Ok(path)
    }
}

pub fn file_name(nametag: &str, timestamp: DateTime<Local>) -> String {
    let stamp = timestamp.format("%Y%m%d-%H%M-%S");
    if nametag.is_empty() {
        format!("{stamp}.{EXTENSION}")
    } else {
        format!("{stamp}_{nametag}.{EXTENSION}")
    }
}

fn base_metadata(meta: &ScanMetadata) -> Vec<(String, MetaValue)> {
    let ranges = &meta.frequency_ranges;
    vec![
        ("Microwave CW Power (dBm)".into(), MetaValue::Float(meta.cw_power)),
        ("Microwave Scan Power (dBm)".into(), MetaValue::Float(meta.scan_power)),
        ("Approx. Run Time (s)".into(), MetaValue::Float(meta.elapsed_time)),
        ("Number of Frequency Sweeps (#)".into(), MetaValue::Int(meta.elapsed_lines)),
        (
            "Start Frequencies (Hz)".into(),
            MetaValue::Floats(ranges.iter().map(|r| r.start).collect()),
        ),
        (
            "Stop Frequencies (Hz)".into(),
            MetaValue::Floats(ranges.iter().map(|r| r.stop).collect()),
        ),
        (
            "Points per Range (#)".into(),
            MetaValue::Ints(ranges.iter().map(|r| r.points as u64).collect()),
        ),
        ("Data Rate (Hz)".into(), MetaValue::Float(meta.data_rate)),
        (
            "Oversampling Factor (#)".into(),
            MetaValue::Int(meta.oversampling_factor as u64),
        ),
    ]
}

/// Frequency column followed by one signal column per channel
pub fn signal_table(
    frequency_data: &[Vec<f64>],
    signal_data: &RangeData,
    channel_units: &BTreeMap<String, String>,
    metadata: Vec<(String, MetaValue)>,
) -> DataTable {
    let mut column_headers = vec!["Frequency (Hz)".to_string()];
    column_headers.extend(signal_data.keys().map(|ch| {
        let unit = channel_units.get(ch).map(String::as_str).unwrap_or("");
        format!("{ch} ({unit})")
    }));

    let frequencies: Vec<f64> = frequency_data.iter().flatten().copied().collect();
    let columns: Vec<Vec<f64>> = signal_data
        .values()
        .map(|ranges| ranges.iter().flatten().copied().collect())
        .collect();
    let rows = frequencies
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let mut row = Vec::with_capacity(columns.len() + 1);
            row.push(*f);
            row.extend(columns.iter().map(|c| c.get(i).copied().unwrap_or(f64::NAN)));
            row
        })
        .collect();

    DataTable {
        metadata,
        column_headers,
        rows,
    }
}

/// Frequency column followed by every acquired line of one channel, newest first
pub fn raw_table(record: &ScanRecord, channel: &str) -> DataTable {
    let unit = record
        .channel_units
        .get(channel)
        .map(String::as_str)
        .unwrap_or("");
    let mut metadata = base_metadata(&record.metadata);
    metadata.push(("Channel Name".into(), MetaValue::Text(channel.to_string())));

    let rows = record
        .frequency_data
        .iter()
        .zip(record.raw_data.get(channel).into_iter().flatten())
        .flat_map(|(freqs, bins)| {
            freqs.iter().zip(bins).map(|(f, lines)| {
                let mut row = Vec::with_capacity(lines.len() + 1);
                row.push(*f);
                row.extend_from_slice(lines);
                row
            })
        })
        .collect();

    DataTable {
        metadata,
        column_headers: vec!["Frequency (Hz)".into(), format!("Scan Data ({unit})")],
        rows,
    }
}

/// Save one raw file per channel and one signal file for all channels.
///
/// Returns the written paths, raw files first.
pub fn save_record(
    dir: &Path,
    tag: Option<&str>,
    record: &ScanRecord,
) -> Result<Vec<PathBuf>, DispatcherError> {
    save_record_at(dir, tag, record, Local::now())
}

#[instrument(name = "export_save_record", skip(record, timestamp), fields(dir = %dir.display()))]
pub fn save_record_at(
    dir: &Path,
    tag: Option<&str>,
    record: &ScanRecord,
    timestamp: DateTime<Local>,
) -> Result<Vec<PathBuf>, DispatcherError> {
    let prefix = match tag {
        Some(t) if !t.is_empty() => format!("{t}_"),
        _ => String::new(),
    };

    let mut paths = Vec::with_capacity(record.raw_data.len() + 1);
    for channel in record.raw_data.keys() {
        let nametag = format!("{prefix}ODMR_{}_raw", sanitize(channel));
        paths.push(raw_table(record, channel).save(dir, &nametag, timestamp)?);
    }

    let mut metadata = base_metadata(&record.metadata);
    metadata.push((
        "Averaged Scans (#)".into(),
        MetaValue::Int(record.metadata.scans_to_average as u64),
    ));
    let table = signal_table(
        &record.frequency_data,
        &record.signal_data,
        &record.channel_units,
        metadata,
    );
    paths.push(table.save(dir, &format!("{prefix}ODMR_signal"), timestamp)?);

    info!(files = paths.len(), lines = record.metadata.elapsed_lines, "Scan data saved");
    Ok(paths)
}

/// Channel names become part of file names
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
