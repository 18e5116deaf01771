//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Units
//! - Frequencies in Hz, powers in dBm, rates in Hz, durations in seconds
//! - A "line" is one full frequency sweep across every configured range

mod blueprint;
mod error;
mod limits;
mod microwave;
mod sampling;
mod scan;
mod sink;
mod snapshot;

pub use blueprint::*;
pub use error::*;
pub use limits::{LimitValue, Limits};
pub use microwave::*;
pub use sampling::*;
pub use scan::*;
pub use sink::*;
pub use snapshot::*;
