//! # Instruments
//!
//! Simulated hardware for the scan engine.
//!
//! Responsibilities:
//! - Provide a microwave source implementing `MicrowaveDevice`
//! - Provide a finite sampling device implementing `FiniteSamplingIo`
//! - Build both from the `microwave` / `sampler` config sections
//! - Support one-shot fault injection for failure testing

mod fault;

pub mod dummy_microwave;
pub mod dummy_sampler;
pub mod factory;

pub use contracts::{FiniteSamplingIo, MicrowaveDevice, ScanBlueprint};
pub use dummy_microwave::{DummyMicrowave, DummyMicrowaveConfig, MicrowaveCallCounts, MicrowaveFault};
pub use dummy_sampler::{DummySampler, DummySamplerConfig, SamplerFault};
pub use factory::{DeviceFactory, DevicePair};
