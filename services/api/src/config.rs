//! services/api/src/config.rs
//!
//! Defines the service configuration and how it is loaded.
//!
//! All configuration comes from environment variables at startup. A `.env`
//! file is honored for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use clicker_core::{EngineSettings, RetryPolicy};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    /// Waiting sessions older than this stop blocking their code.
    pub stale_session_ttl_hours: i64,
    pub store_retry_attempts: u32,
    pub store_retry_base_ms: u64,
    pub max_write_attempts: u32,
    /// Bearer token for `/admin` routes. Admin routes refuse every call when unset.
    pub admin_token: Option<String>,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// The `.env` file is skipped in test builds so tests stay hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and Database ---
        let bind_address = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Engine tuning ---
        let stale_session_ttl_hours = parse_var("STALE_SESSION_TTL_HOURS", "12")?;
        let store_retry_attempts = parse_var("STORE_RETRY_ATTEMPTS", "3")?;
        let store_retry_base_ms = parse_var("STORE_RETRY_BASE_MS", "50")?;
        let max_write_attempts = parse_var("MAX_WRITE_ATTEMPTS", "8")?;
        if stale_session_ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue(
                "STALE_SESSION_TTL_HOURS".to_string(),
                "must be a positive number of hours".to_string(),
            ));
        }

        // --- Access ---
        let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            stale_session_ttl_hours,
            store_retry_attempts,
            store_retry_base_ms,
            max_write_attempts,
            admin_token,
            cors_origin,
        })
    }

    /// The engine tunables derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            stale_waiting_ttl: chrono::Duration::hours(self.stale_session_ttl_hours),
            retry: RetryPolicy {
                max_attempts: self.store_retry_attempts.max(1),
                base_delay: Duration::from_millis(self.store_retry_base_ms),
            },
            max_write_attempts: self.max_write_attempts.max(1),
        }
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: "postgres://localhost/clicker".to_string(),
            log_level: Level::INFO,
            stale_session_ttl_hours: 6,
            store_retry_attempts: 0,
            store_retry_base_ms: 20,
            max_write_attempts: 4,
            admin_token: None,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn engine_settings_follow_the_config() {
        let settings = sample().engine_settings();
        assert_eq!(settings.stale_waiting_ttl, chrono::Duration::hours(6));
        assert_eq!(settings.retry.max_attempts, 1);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(20));
        assert_eq!(settings.max_write_attempts, 4);
    }

    #[test]
    fn unparseable_values_name_the_variable() {
        let err = parse_var::<u32>("CLICKER_TEST_UNSET_VAR", "many").unwrap_err();
        match err {
            ConfigError::InvalidValue(name, _) => assert_eq!(name, "CLICKER_TEST_UNSET_VAR"),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(parse_var::<u32>("CLICKER_TEST_UNSET_VAR", "7").unwrap(), 7);
    }
}
