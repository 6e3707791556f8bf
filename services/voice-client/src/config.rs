//! Application Configuration Module
//!
//! Loads the client's settings from environment variables (and a `.env`
//! file when present) into one struct that the binary hands to the assistant
//! client, the runtime and the console.

use assistant_client::DEFAULT_BASE_URL;
use std::env;
use std::time::Duration;
use tracing::Level;
use voice_session_core::OutputMode;
use voice_session_core::consts::{HEALTH_TIMEOUT, PREFERRED_VOICE_PROVIDER, REQUEST_TIMEOUT};

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
    pub output_mode: OutputMode,
    pub preferred_voice_provider: String,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// *   `ASSISTANT_BASE_URL`: (Optional) Root URL of the assistant backend.
    /// *   `ASSISTANT_TIMEOUT_SECS`: (Optional) Bound on one request. Defaults to 10.
    /// *   `HEALTH_TIMEOUT_SECS`: (Optional) Bound on the health probe. Defaults to 5.
    /// *   `OUTPUT_MODE`: (Optional) "text" or "voice". Defaults to "text".
    /// *   `PREFERRED_VOICE_PROVIDER`: (Optional) Voice name to look for. Defaults to "Google".
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Useful for local development, ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("ASSISTANT_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if base_url.trim().is_empty() {
            return Err(ConfigError::MissingVar(
                "ASSISTANT_BASE_URL must not be blank".to_string(),
            ));
        }

        let request_timeout = parse_secs(
            "ASSISTANT_TIMEOUT_SECS",
            lookup("ASSISTANT_TIMEOUT_SECS"),
            REQUEST_TIMEOUT,
        )?;
        let health_timeout = parse_secs(
            "HEALTH_TIMEOUT_SECS",
            lookup("HEALTH_TIMEOUT_SECS"),
            HEALTH_TIMEOUT,
        )?;

        let output_mode = match lookup("OUTPUT_MODE") {
            Some(raw) => raw
                .parse::<OutputMode>()
                .map_err(|e| ConfigError::InvalidValue("OUTPUT_MODE".to_string(), e.to_string()))?,
            None => OutputMode::Text,
        };

        let preferred_voice_provider = lookup("PREFERRED_VOICE_PROVIDER")
            .unwrap_or_else(|| PREFERRED_VOICE_PROVIDER.to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            base_url,
            request_timeout,
            health_timeout,
            output_mode,
            preferred_voice_provider,
            log_level,
        })
    }
}

fn parse_secs(name: &str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a positive number of seconds", raw),
        )),
    }
}
