//! # Dispatcher
//!
//! Scan data distribution.
//!
//! Responsibilities:
//! - Consume `ScanSnapshot`s published by the scan engine
//! - Fan out to multiple sinks
//! - Isolate slow sinks so they never block the engine
//! - Export finished scans as text data files

pub mod dispatcher;
pub mod error;
pub mod export;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{DataSink, ScanSnapshot};
pub use dispatcher::{
    create_dispatcher, DispatchSummary, Dispatcher, DispatcherBuilder, DispatcherConfig,
};
pub use error::DispatcherError;
pub use export::{save_record, save_record_at, DataTable, MetaValue};
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, FileSinkConfig, LogSink};
