//! Layered error definitions
//!
//! Categorized by source: config / state / hardware / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bad parameters or violated limits. Raised before any hardware is touched.
    #[error("configuration error at '{field}': {message}")]
    Configuration { field: String, message: String },

    // ===== State Errors =====
    /// A scan is already armed or paused
    #[error("cannot {operation}: a scan is already running")]
    AlreadyRunning { operation: String },

    /// Transition not allowed from the current state
    #[error("cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    // ===== Hardware Errors =====
    /// Device reports an unexpected busy/idle state
    #[error("device '{device}' in unexpected state: {message}")]
    HardwareState { device: String, message: String },

    /// Frame not completed within the timeout budget
    #[error("device '{device}' acquisition timeout: waited {waited_ms}ms for {frame_size} samples")]
    AcquisitionTimeout {
        device: String,
        waited_ms: u64,
        frame_size: usize,
    },

    /// Any other failure reported by a device
    #[error("device '{device}' failure: {message}")]
    Device { device: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration error
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn already_running(operation: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            operation: operation.into(),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create hardware state error
    pub fn hardware_state(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HardwareState {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create acquisition timeout error
    pub fn acquisition_timeout(device: impl Into<String>, waited_ms: u64, frame_size: usize) -> Self {
        Self::AcquisitionTimeout {
            device: device.into(),
            waited_ms,
            frame_size,
        }
    }

    /// Create generic device error
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// True for parse and parameter errors, which never leave side effects behind.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigParse { .. } | Self::Configuration { .. })
    }

    /// True for errors raised by a device rather than by the caller.
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::HardwareState { .. } | Self::AcquisitionTimeout { .. } | Self::Device { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(ContractError::configuration("points", "must be >= 2").is_configuration());
        assert!(ContractError::config_parse("bad toml").is_configuration());
        assert!(!ContractError::already_running("start scan").is_configuration());

        assert!(ContractError::hardware_state("mw", "busy").is_hardware());
        assert!(ContractError::acquisition_timeout("daq", 1500, 100).is_hardware());
        assert!(!ContractError::invalid_state("pause scan", "idle").is_hardware());
    }

    #[test]
    fn test_error_messages() {
        let err = ContractError::invalid_state("continue scan", "idle");
        assert_eq!(err.to_string(), "cannot continue scan while idle");

        let err = ContractError::configuration("frequency_ranges[0].points", "must be >= 2");
        assert!(err.to_string().contains("frequency_ranges[0].points"));
    }
}
