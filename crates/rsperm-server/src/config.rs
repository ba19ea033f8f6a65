//! Service settings for an embedded rsperm instance.
//!
//! Settings come from three layers:
//! 1. Default values (hardcoded)
//! 2. Settings file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over the file, which takes
//! precedence over defaults.
//!
//! These settings say *where* things live (the authorization document, the
//! grant database) and how to log. The authorization document itself is a
//! separate JSON file, see [`rsperm_domain::AuthConfig`].
//!
//! # Example
//!
//! ```ignore
//! use rsperm_server::config::ServerConfig;
//!
//! let settings = ServerConfig::load("rsperm.yaml")?;
//! let settings = ServerConfig::from_env()?;
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides (`RSPERM_STORAGE__BACKEND=sqlite`).
pub const ENV_PREFIX: &str = "RSPERM";

/// Backends accepted by `storage.backend`.
pub const VALID_BACKENDS: [&str; 2] = ["memory", "sqlite"];

/// Service settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Authorization document settings
    #[serde(default)]
    pub auth: AuthSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where the authorization document lives.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AuthSettings {
    /// Path to the JSON authorization document.
    ///
    /// Environment variable: `RSPERM_AUTH__CONFIG_PATH`
    #[serde(default = "default_config_path")]
    pub config_path: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
        }
    }
}

fn default_config_path() -> String {
    "permissions.json".to_string()
}

/// Storage backend settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// storage:
///   backend: sqlite
///   database_url: "sqlite://data/rsperm.db"
///   pool_size: 5
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type: "memory" or "sqlite"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database connection URL (required if backend is "sqlite")
    pub database_url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    5
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for settings loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load settings from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `RSPERM_` and use `__` as separator:
    /// - `RSPERM_STORAGE__BACKEND=sqlite` overrides `storage.backend`
    /// - `RSPERM_AUTH__CONFIG_PATH=...` overrides `auth.config_path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let settings: ServerConfig = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Load settings from defaults plus `RSPERM_` environment variables.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(env_source())
            .build()?;

        let settings: ServerConfig = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.auth.config_path.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "auth.config_path must not be empty".to_string(),
            });
        }

        if !VALID_BACKENDS.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    VALID_BACKENDS, self.storage.backend
                ),
            });
        }

        if self.storage.backend == "sqlite"
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid {
                message: "storage.database_url is required when backend is 'sqlite'".to_string(),
            });
        }

        if self.storage.pool_size == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "storage.pool_size must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}

// RSPERM_STORAGE__DATABASE_URL -> storage.database_url
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
