// Report Configuration
// TOML settings from an explicit path or the platform config directory, with defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::traits::{ConnectionConfig, DatabaseType};
use crate::query::dialect::is_valid_identifier;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where and how artifacts are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub root: PathBuf,
    /// Render targets concurrently
    pub parallel: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./output/visualizations"),
            parallel: false,
        }
    }
}

/// The flow table the catalogue reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    pub table: String,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            table: "unsw_nb15_combined".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Deadline for connecting and querying; the run is cancelled once it passes
    pub timeout_secs: Option<u64>,
}

impl RunSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Full configuration of a report run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub connection: ConnectionConfig,
    pub output: OutputSettings,
    pub dataset: DatasetSettings,
    pub run: RunSettings,
}

impl ReportConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Explicit file if given, else the platform config file if it exists,
    /// else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !is_valid_identifier(&self.dataset.table) {
            return Err(ConfigError::Invalid(format!(
                "dataset table '{}' is not a plain identifier",
                self.dataset.table
            )));
        }
        if self.output.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output root is required".to_string()));
        }
        if self.run.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("run timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Switch engine; the port falls back to the new engine's default
    pub fn set_engine(&mut self, engine: DatabaseType) {
        if self.connection.engine != engine {
            self.connection.engine = engine;
            self.connection.port = None;
        }
    }
}

/// `<platform config dir>/traffic-report/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "traffic-report", "traffic-report")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
