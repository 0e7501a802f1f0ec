//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables at startup. The store
//! location and the webhook secret are mandatory; the process refuses to
//! start without them.

use std::env;

use thiserror::Error;

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database location, either a plain path or a `sqlite:///` URL
    pub database_url: String,

    /// Shared secret for webhook HMAC signature verification
    pub webhook_secret: String,

    /// Port for the web server to listen on
    pub port: u16,

    /// Log verbosity used when RUST_LOG is not set
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Fails if `DATABASE_URL` or `WEBHOOK_SECRET` is absent or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            database_url: require("DATABASE_URL")?,

            webhook_secret: require("WEBHOOK_SECRET")?,

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Filesystem path to the SQLite database file.
    ///
    /// Accepts both a bare path and the `sqlite:///path` URL form.
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite:///")
            .unwrap_or(&self.database_url)
    }
}

/// Read a mandatory environment variable, rejecting empty values.
fn require(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}
