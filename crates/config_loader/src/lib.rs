//! # Config Loader
//!
//! Reads, validates and writes back the persisted [`ScanBlueprint`].
//!
//! The blueprint doubles as the session store: `run` loads it at startup and
//! writes the final scan and CW values back on shutdown, so the next session
//! starts where the last one ended. Format follows the file extension
//! (`.toml` or `.json`).
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_or_default(Path::new("scan.toml")).unwrap();
//! println!("Ranges: {}", blueprint.scan.frequency_ranges.len());
//! ```

mod parser;
mod validator;

pub use contracts::ScanBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;
use tracing::{debug, info};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a blueprint file
    ///
    /// # Errors
    /// `ConfigParse` for unreadable files, unknown extensions and syntax
    /// errors; `Configuration` when a value breaks a rule.
    pub fn load_from_path(path: &Path) -> Result<ScanBlueprint, ContractError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| ContractError::ConfigParse {
            message: format!("cannot read {}: {e}", path.display()),
            source: Some(Box::new(e)),
        })?;
        let blueprint = Self::load_from_str(&content, format)?;
        debug!(
            path = %path.display(),
            ranges = blueprint.scan.frequency_ranges.len(),
            sinks = blueprint.sinks.len(),
            "Config loaded"
        );
        Ok(blueprint)
    }

    /// Like [`load_from_path`](Self::load_from_path), but a missing file
    /// yields the default blueprint (first session on this machine)
    pub fn load_or_default(path: &Path) -> Result<ScanBlueprint, ContractError> {
        ConfigFormat::from_path(path)?;
        if path.exists() {
            return Self::load_from_path(path);
        }
        info!(path = %path.display(), "No stored session, using defaults");
        Ok(ScanBlueprint::default())
    }

    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<ScanBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Validate an in-memory blueprint with the same rules used on load
    pub fn validate(blueprint: &ScanBlueprint) -> Result<(), ContractError> {
        validator::validate(blueprint)
    }

    pub fn to_toml(blueprint: &ScanBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(blueprint: &ScanBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }

    /// Validate and write a blueprint, format chosen by extension
    ///
    /// Written to a sibling `.tmp` file first and renamed into place, so an
    /// interrupted write never leaves a truncated session behind.
    pub fn save_to_path(blueprint: &ScanBlueprint, path: &Path) -> Result<(), ContractError> {
        validator::validate(blueprint)?;
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => Self::to_toml(blueprint)?,
            ConfigFormat::Json => Self::to_json(blueprint)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Config written back");
        Ok(())
    }
}
