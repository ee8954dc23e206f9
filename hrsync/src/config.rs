//! Runtime configuration. Everything the sync needs is read once into an
//! `AppConfig` and handed to constructors; nothing is kept in globals.
//!
//! The file may be the secret store itself: unknown keys such as
//! `{name}_key`/`{name}_token` are ignored here.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::Level;

use crate::posting::PostingRow;
use crate::vault::DEFAULT_STORE_PATH;

pub const DEFAULT_CONFIG_PATH: &str = "configs/config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

/// Inputs and outputs of the historic pull.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Employment-status table: cleaned JSON, or the HR XML export when the
    /// file ends in `.xml`.
    pub status_table: PathBuf,
    /// Directory report export.
    pub directory_report: PathBuf,
    /// Sheet reposted from scratch on every run.
    pub history_output: PathBuf,
    /// Sheet whose existing rows are updated in place.
    pub recognition_output: PathBuf,
    /// Column used to match rows in the recognition sheet.
    pub recognition_update_key: String,
    pub workers: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            status_table: PathBuf::from("data/employment_status.json"),
            directory_report: PathBuf::from("data/directory_report.json"),
            history_output: PathBuf::from("data/historic_hris_data.json"),
            recognition_output: PathBuf::from("data/anniversary_recognition.json"),
            recognition_update_key: "Id".to_string(),
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            logging: LoggingConfig::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.level()?;
        if self.sync.workers == 0 {
            return Err(ConfigError::Invalid("sync.workers must be at least 1".to_string()));
        }
        if !PostingRow::is_column(&self.sync.recognition_update_key) {
            return Err(ConfigError::Invalid(format!(
                "sync.recognition_update_key '{}' is not a posting column",
                self.sync.recognition_update_key
            )));
        }
        Ok(())
    }
}
