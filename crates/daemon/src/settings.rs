//! Daemon settings
//!
//! Loaded from a YAML file, then overridden from the environment:
//!
//! ```yaml
//! database:
//!   url: postgres://pusher@localhost/payments
//!   max_connections: 20
//! routes_file: config/routes.yaml
//! engine:
//!   wrapper_url: http://127.0.0.1:8080/push
//!   bucket_size: 50
//!   max_workers: 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use status_pusher_engine::{ConfigError, EngineConfig};

/// Default environment variable holding the route password key
pub const DEFAULT_ENCRYPTION_KEY_ENV: &str = "PUSH_ENCRYPTION_KEY";

/// Settings loading errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    /// How long a job waits for a free connection
    #[serde(with = "status_pusher_engine::serde_duration::secs")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything the daemon needs to start
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub engine: EngineConfig,
    /// YAML file mapping client codes to routes
    pub routes_file: PathBuf,
    /// Environment variable holding the base64 route password key
    pub encryption_key_env: Option<String>,
    /// Log filter used when neither RUST_LOG nor LOG_LEVEL is set
    pub log_filter: Option<String>,
}

impl Settings {
    /// Read, override from the environment and validate
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = Self::from_file(path)?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Read a settings file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply environment overrides
    ///
    /// - `DATABASE_URL`: database connection string
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database.url = url;
            }
        }
    }

    /// Name of the environment variable holding the password key
    pub fn encryption_key_env(&self) -> &str {
        self.encryption_key_env
            .as_deref()
            .unwrap_or(DEFAULT_ENCRYPTION_KEY_ENV)
    }

    /// Check every setting, returning all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.database.url.trim().is_empty() {
            problems.push("database.url may not have been set (or DATABASE_URL)".to_string());
        }
        if self.database.max_connections == 0 {
            problems.push("database.max_connections must be greater than 0".to_string());
        }
        if self.routes_file.as_os_str().is_empty() {
            problems.push("routes_file may not have been set".to_string());
        }
        if let Err(engine) = self.engine.validate() {
            problems.extend(engine.problems.into_iter().map(|p| format!("engine.{p}")));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }
}
