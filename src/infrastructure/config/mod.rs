//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Server port cannot be 0")]
    InvalidPort,

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid retry attempts: {0}. Cannot be 0")]
    InvalidRetryAttempts(u32),

    #[error("Invalid interval: {0} must be positive")]
    InvalidInterval(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. taskroom.yaml (project config)
    /// 3. taskroom.local.yaml (local overrides, optional)
    /// 4. Environment variables (TASKROOM_ prefix, `__` nesting separator)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("taskroom.yaml"))
            .merge(Yaml::file("taskroom.local.yaml"))
            .merge(Env::prefixed("TASKROOM_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring env overrides.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("TASKROOM_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        if config.store_retry.attempts == 0 {
            return Err(ConfigError::InvalidRetryAttempts(config.store_retry.attempts));
        }

        if config.room.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval("room.heartbeat_interval_ms"));
        }
        if config.room.blocked_summary_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval("room.blocked_summary_interval_ms"));
        }
        if config.room.unblock_ping_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval("room.unblock_ping_interval_ms"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ConfigLoader::validate(&Config::default()).expect("defaults should validate");
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidPort)));
    }

    #[test]
    fn rejects_bad_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn loads_overrides_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskroom.yaml");
        std::fs::write(
            &path,
            "server:\n  port: 9999\nroom:\n  heartbeat_interval_ms: 1000\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.room.heartbeat_interval_ms, 1000);
        // Untouched keys keep their defaults.
        assert_eq!(config.room.blocked_summary_interval_ms, 20_000);
    }
}
