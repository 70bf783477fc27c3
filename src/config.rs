//! Configuration
//!
//! YAML configuration with load-time validation. The config path defaults
//! to `configs/config.yaml` and can be overridden with the `CONFIG_PATH`
//! environment variable. An invalid config is a fatal startup error.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Balancing algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
}

/// Which config store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Inmemory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BalancingConfig {
    #[serde(default)]
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultRateConfig {
    #[serde(default = "default_capacity")]
    pub capacity: i64,
    #[serde(default = "default_rate")]
    pub rate: f64,
}

impl Default for DefaultRateConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            rate: default_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub store: StoreType,
    #[serde(default)]
    pub default: DefaultRateConfig,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub backends: Vec<String>,
    #[serde(default)]
    pub balancing: BalancingConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_capacity() -> i64 {
    100
}

fn default_rate() -> f64 {
    10.0
}

fn default_health_interval() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Config file location: `CONFIG_PATH` when set, `configs/config.yaml`
/// otherwise.
pub fn config_path() -> PathBuf {
    match std::env::var("CONFIG_PATH") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => Path::new("configs").join("config.yaml"),
    }
}

/// Read, parse, and validate the config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be in 1..=65535".to_string()));
        }
        if self.backends.is_empty() {
            return Err(ConfigError::Invalid("no backends specified".to_string()));
        }

        if self.rate_limiting.enabled {
            let default = &self.rate_limiting.default;
            if default.capacity <= 0 {
                return Err(ConfigError::Invalid(
                    "rate_limiting.default.capacity must be positive".to_string(),
                ));
            }
            if default.rate <= 0.0 {
                return Err(ConfigError::Invalid(
                    "rate_limiting.default.rate must be positive".to_string(),
                ));
            }
            if self.rate_limiting.store == StoreType::Postgres
                && self.rate_limiting.postgres.is_none()
            {
                return Err(ConfigError::Invalid(
                    "rate_limiting.postgres settings required for type=postgres".to_string(),
                ));
            }
        }

        Ok(())
    }
}
