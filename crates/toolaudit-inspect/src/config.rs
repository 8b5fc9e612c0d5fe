//! Inspector configuration loading from file and environment variables.

use serde::Deserialize;
use thiserror::Error;
use toolaudit_db::Synchronous;
use toolaudit_journal::JournalConfig;

/// Top-level inspector configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Journal behaviour (retention, chaining).
    #[serde(default)]
    pub journal: JournalConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Commit durability: "normal" or "full".
    #[serde(default)]
    pub synchronous: Synchronous,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "toolaudit_journal=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_path() -> String {
    "toolaudit.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_log_level() -> String {
    // Logs go to stderr; keep them quiet so stdout stays machine-readable.
    "warn".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            synchronous: Synchronous::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TOOLAUDIT_DB_PATH` overrides `database.path`
/// - `TOOLAUDIT_LOG_LEVEL` overrides `logging.level`
/// - `TOOLAUDIT_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TOOLAUDIT_RETENTION_MS` overrides `journal.retention_ms`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(db_path) = var("TOOLAUDIT_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("TOOLAUDIT_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("TOOLAUDIT_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(retention) = var("TOOLAUDIT_RETENTION_MS") {
        if let Ok(parsed) = retention.parse() {
            config.journal.retention_ms = Some(parsed);
        }
    }
}
