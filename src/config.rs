//! Configuration loaded with Figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. `config/sweep_daq.toml` (or the path given to [`SweepConfig::load_from`])
//! 2. Environment variables prefixed with `SWEEP_DAQ_`, nested keys split on `__`
//!
//! Every field has a default, so a missing file yields the default configuration.
//!
//! # Example
//! ```no_run
//! use sweep_daq::config::SweepConfig;
//!
//! # fn main() -> sweep_daq::AppResult<()> {
//! // SWEEP_DAQ_STORAGE__BASE_DIR=/data/run42 overrides the file
//! let config = SweepConfig::load()?;
//! config.validate()?;
//! println!("writing to {}", config.storage.base_dir.display());
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use crate::storage::StorageFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/sweep_daq.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SWEEP_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where and how experiments are stored.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
    /// pretty, compact or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Experiment storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory under which each top-level experiment gets its own directory.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Storage file format.
    #[serde(default)]
    pub format: StorageFormat,
    /// Storage file name without extension.
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("experiment_data")
}

fn default_file_name() -> String {
    "data".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_log_format(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            format: StorageFormat::default(),
            file_name: default_file_name(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl SweepConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The provider chain used by [`SweepConfig::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(SweepConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> AppResult<()> {
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        let format = self.logging.format.to_lowercase();
        if !LOG_FORMATS.contains(&format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                LOG_FORMATS.join(", ")
            )));
        }
        if self.storage.file_name.trim().is_empty() {
            return Err(DaqError::Configuration(
                "storage.file_name must not be empty".into(),
            ));
        }
        if self.storage.file_name.contains(['/', '\\']) {
            return Err(DaqError::Configuration(format!(
                "storage.file_name '{}' must not contain path separators",
                self.storage.file_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SweepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.base_dir, PathBuf::from("experiment_data"));
        assert_eq!(config.storage.format, StorageFormat::Json);
        assert_eq!(config.storage.file_name, "data");
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = SweepConfig::default();
        config.logging.level = "verbose".into();
        assert!(matches!(config.validate(), Err(DaqError::Configuration(_))));

        let mut config = SweepConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = SweepConfig::default();
        config.storage.file_name = "a/b".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn level_check_is_case_insensitive() {
        let mut config = SweepConfig::default();
        config.logging.level = "DEBUG".into();
        assert!(config.validate().is_ok());
    }
}
