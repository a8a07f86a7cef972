// Configuration management

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::auth::token::TokenSettings;
use crate::service::CoreSettings;

/// Minimum length of the token signing secret, in bytes
pub const MIN_SECRET_LEN: usize = 32;

// Upper bounds for numeric settings
pub const MAX_DATABASE_CONNECTIONS: u64 = 1_000;
pub const MAX_TOKEN_TTL_HOURS: u64 = 24 * 365;
pub const MAX_TIMEOUT_SECS: u64 = 3_600;
pub const MAX_BODY_SIZE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(String),

    #[error("Invalid {key} value '{value}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Other(String),
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Application configuration loaded from environment variables
///
/// Without `DATABASE_URL` the server runs on the in-memory store.
pub struct Config {
    // Server configuration
    pub bind_address: String,
    pub port: u16,

    // Database configuration (optional)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Token configuration
    pub jwt_secret: SecretString,
    pub token_ttl_hours: u64,
    pub token_refresh_window_minutes: u64,

    // Core behaviour
    pub store_timeout_secs: u64,
    pub completion_threshold: Decimal,

    // Middleware configuration
    pub request_timeout_secs: u64,
    pub body_size_limit_bytes: usize,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    /// The signing secret comes from `JWT_SECRET`, or from the file named by
    /// `JWT_SECRET_FILE` when the variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Skip in test environment to avoid interfering with test environment variables
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok();
        }

        let jwt_secret = Self::read_secret(
            Self::get_optional_env("JWT_SECRET"),
            Self::get_optional_env("JWT_SECRET_FILE").map(PathBuf::from),
        )?;

        let config = Self {
            bind_address: Self::get_env_or_default("BIND_ADDRESS", "0.0.0.0"),
            port: Self::parse_port()?,
            database_url: Self::get_optional_env("DATABASE_URL"),
            database_max_connections: Self::parse_bounded("DATABASE_MAX_CONNECTIONS", 10u32, MAX_DATABASE_CONNECTIONS)?,
            jwt_secret,
            token_ttl_hours: Self::parse_bounded("TOKEN_TTL_HOURS", 24u64, MAX_TOKEN_TTL_HOURS)?,
            token_refresh_window_minutes: Self::parse_bounded(
                "TOKEN_REFRESH_WINDOW_MINUTES",
                60u64,
                MAX_TOKEN_TTL_HOURS * 60,
            )?,
            store_timeout_secs: Self::parse_bounded("STORE_TIMEOUT_SECS", 5u64, MAX_TIMEOUT_SECS)?,
            completion_threshold: Self::parse_threshold()?,
            request_timeout_secs: Self::parse_bounded("REQUEST_TIMEOUT_SECS", 30u64, MAX_TIMEOUT_SECS)?,
            body_size_limit_bytes: Self::parse_bounded(
                "BODY_SIZE_LIMIT_BYTES",
                5 * 1024 * 1024usize,
                MAX_BODY_SIZE_BYTES,
            )?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info"),
            log_format: Self::get_env_or_default("LOG_FORMAT", "json"),
        };

        config.validate()?;
        Ok(config)
    }

    fn get_env_or_default(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    fn get_optional_env(key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    /// Parse port from PORT environment variable
    fn parse_port() -> Result<u16, ConfigError> {
        let port_str = Self::get_env_or_default("PORT", "8080");
        let port = port_str.parse::<u16>().map_err(|e| invalid("PORT", &port_str, e))?;
        if port == 0 {
            return Err(invalid("PORT", &port_str, "must be between 1 and 65535"));
        }
        Ok(port)
    }

    /// Parse a positive integer no larger than `max`, or return the default
    fn parse_bounded<T: TryFrom<u64>>(key: &str, default: T, max: u64) -> Result<T, ConfigError> {
        match env::var(key) {
            Ok(value) => Self::parse_in_range(key, &value, max),
            _ => Ok(default),
        }
    }

    fn parse_in_range<T: TryFrom<u64>>(key: &str, value: &str, max: u64) -> Result<T, ConfigError> {
        let parsed = value.parse::<u64>().map_err(|e| invalid(key, value, e))?;
        if parsed == 0 || parsed > max {
            return Err(invalid(key, value, format!("must be between 1 and {}", max)));
        }
        T::try_from(parsed).map_err(|_| invalid(key, value, "out of range for this platform"))
    }

    fn parse_threshold() -> Result<Decimal, ConfigError> {
        let value = Self::get_env_or_default("COMPLETION_THRESHOLD", "100");
        let parsed = value
            .parse::<Decimal>()
            .map_err(|e| invalid("COMPLETION_THRESHOLD", &value, e))?;
        if parsed <= Decimal::ZERO || parsed > Decimal::ONE_HUNDRED {
            return Err(invalid("COMPLETION_THRESHOLD", &value, "must be in (0, 100]"));
        }
        Ok(parsed)
    }

    /// Resolve the signing secret from an inline value or a file
    fn read_secret(inline: Option<String>, file: Option<PathBuf>) -> Result<SecretString, ConfigError> {
        let secret = match (inline, file) {
            (Some(value), _) => value,
            (None, Some(path)) => Self::read_secret_file(&path)?,
            (None, None) => return Err(ConfigError::Missing("JWT_SECRET or JWT_SECRET_FILE".to_string())),
        };
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Other(format!(
                "JWT secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(SecretString::new(secret))
    }

    fn read_secret_file(path: &Path) -> Result<String, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Other(format!("Cannot read JWT_SECRET_FILE at {:?}: {}", path, e)))?;
        Ok(contents.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Validate all configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref url) = self.database_url {
            Self::validate_url(url, "DATABASE_URL")?;
        }
        if self.jwt_secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(ConfigError::Other(format!(
                "JWT secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if self.token_ttl_hours == 0 || self.token_ttl_hours > MAX_TOKEN_TTL_HOURS {
            return Err(ConfigError::Other(format!(
                "TOKEN_TTL_HOURS must be between 1 and {}",
                MAX_TOKEN_TTL_HOURS
            )));
        }
        if self.token_refresh_window_minutes > self.token_ttl_hours * 60 {
            return Err(ConfigError::Other(
                "TOKEN_REFRESH_WINDOW_MINUTES must not exceed the token lifetime".to_string(),
            ));
        }
        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;
        Ok(())
    }

    fn validate_url(url: &str, key: &str) -> Result<(), ConfigError> {
        url::Url::parse(url).map_err(|e| invalid(key, url, e))?;
        Ok(())
    }

    fn validate_log_level(level: &str) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(invalid(
                "LOG_LEVEL",
                level,
                format!("must be one of {}", valid_levels.join(", ")),
            ));
        }
        Ok(())
    }

    fn validate_log_format(format: &str) -> Result<(), ConfigError> {
        if format != "json" && format != "text" {
            return Err(invalid("LOG_FORMAT", format, "must be 'json' or 'text'"));
        }
        Ok(())
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            ttl: chrono::Duration::hours(self.token_ttl_hours.min(MAX_TOKEN_TTL_HOURS) as i64),
            refresh_window: chrono::Duration::minutes(
                self.token_refresh_window_minutes.min(MAX_TOKEN_TTL_HOURS * 60) as i64,
            ),
        }
    }

    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            completion_threshold: self.completion_threshold,
        }
    }

    /// Create a test configuration
    ///
    /// Bypasses environment loading; runs on the in-memory store.
    pub fn test_config() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            database_url: None,
            database_max_connections: 10,
            jwt_secret: SecretString::new("test-secret-key-with-at-least-32-bytes!!".to_string()),
            token_ttl_hours: 24,
            token_refresh_window_minutes: 60,
            store_timeout_secs: 5,
            completion_threshold: Decimal::ONE_HUNDRED,
            request_timeout_secs: 30,
            body_size_limit_bytes: 5 * 1024 * 1024,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}
