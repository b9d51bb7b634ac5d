//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

use ride_share_core::{AssignmentPolicy, AvailableScope};

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
    pub db_max_connections: u32,
    pub log_level: Level,
    pub cors_allowed_origin: String,
    /// Whether a driver may accept a ride they posted.
    pub allow_self_accept: bool,
    /// Show rides of every status in the available feed instead of only pending ones.
    pub available_feed_all_statuses: bool,
    /// Back-off before re-establishing a dropped LISTEN connection.
    pub listener_retry: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Database Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", lookup("DB_MAX_CONNECTIONS"), 5)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_allowed_origin = lookup("CORS_ALLOWED_ORIGIN")
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Ride policy switches ---
        let allow_self_accept = parse_flag("ALLOW_SELF_ACCEPT", lookup("ALLOW_SELF_ACCEPT"))?;
        let available_feed_all_statuses = parse_flag(
            "AVAILABLE_FEED_ALL_STATUSES",
            lookup("AVAILABLE_FEED_ALL_STATUSES"),
        )?;

        let listener_retry_ms: u64 =
            parse_or("LISTENER_RETRY_MS", lookup("LISTENER_RETRY_MS"), 1000)?;

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            cors_allowed_origin,
            allow_self_accept,
            available_feed_all_statuses,
            listener_retry: Duration::from_millis(listener_retry_ms),
        })
    }

    pub fn assignment_policy(&self) -> AssignmentPolicy {
        AssignmentPolicy {
            allow_self_acceptance: self.allow_self_accept,
        }
    }

    pub fn available_scope(&self) -> AvailableScope {
        if self.available_feed_all_statuses {
            AvailableScope::AllStatuses
        } else {
            AvailableScope::PendingOnly
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, raw: Option<String>) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("'{}' is not a boolean", v),
            )),
        },
    }
}
