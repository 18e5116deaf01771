//! # Scan Engine
//!
//! ODMR frequency-scan synchronization core.
//!
//! Responsibilities:
//! - Arm the microwave source and the finite sampler as one unit
//! - Acquire one frame per scan line, strictly in sequence
//! - Reduce oversampled frames and accumulate lines in a growable buffer
//! - Publish snapshots (signal average, counters, state) to observers
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use scan_engine::{EngineOptions, ScanEngine};
//!
//! let engine = ScanEngine::new(Arc::new(microwave), Arc::new(sampler), EngineOptions::from_blueprint(&blueprint))?;
//! engine.start_scan().await?;
//! let finished = engine.wait_while_scanning().await;
//! ```

mod buffer;
mod engine;
mod limits;
mod line;
mod session;

pub use buffer::{BufferError, FrameBuffer, Growth};
pub use engine::{EngineOptions, ScanEngine};
pub use limits::ScanLimits;
pub use line::{reduce_oversampling, scan_sequence, split_ranges};
pub use session::{estimated_lines, initial_capacity, MAX_PREALLOCATED_LINES};
