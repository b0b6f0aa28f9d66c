//! Configuration settings for syncq.
//!
//! Settings are loaded from `~/.syncq/config.yaml`.

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::SyncqError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Backend connection settings.
    pub backend: BackendConfig,
    /// Queue and dispatch settings.
    pub queue: QueueConfig,
    /// Identity stamped onto outgoing writes.
    pub session: SessionConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    /// `tracing` filter directive, overridden by `SYNCQ_LOG`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the document API, e.g. `https://api.example.com/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

/// Queue and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Transient failures tolerated before an operation is reported as lost.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Stop draining after the first permanent failure.
    #[serde(default)]
    pub stop_on_permanent: bool,
}

/// Identity stamped onto outgoing writes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Current user id, written as `createdBy`.
    pub user_id: Option<String>,
    /// Current company, written as `company`.
    pub company: Option<String>,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

fn default_log_filter() -> String {
    "syncq=info".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

fn default_token_env() -> String {
    "SYNCQ_TOKEN".to_string()
}

const fn default_max_attempts() -> u32 {
    3
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            log_filter: default_log_filter(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            token_env: default_token_env(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stop_on_permanent: false,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, SyncqError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncqError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncqError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            SyncqError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self) -> Result<(), SyncqError> {
        let paths = Paths::new()?;
        paths.ensure_dirs()?;
        self.save_to_path(&paths.config_file)
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncqError> {
        let contents = serde_yaml::to_string(self)?;

        std::fs::write(path, contents).map_err(|e| {
            SyncqError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    fn validate(&self) -> Result<(), SyncqError> {
        if self.queue.max_attempts == 0 {
            return Err(SyncqError::Config(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(SyncqError::Config(
                "backend.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
