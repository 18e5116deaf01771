//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Devices could not be built or do not fit the recalled settings
    #[error("Device setup failed: {message}")]
    DeviceSetup { message: String },

    /// The scan ended with an acquisition or hardware error
    #[error("Scan failed: {message}")]
    ScanFailed { message: String },

    /// Configuration validation failed
    #[error("Configuration validation failed")]
    InvalidConfig,
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn device_setup(message: impl Into<String>) -> Self {
        Self::DeviceSetup {
            message: message.into(),
        }
    }

    pub fn scan_failed(message: impl Into<String>) -> Self {
        Self::ScanFailed {
            message: message.into(),
        }
    }
}
