//! Environment Configuration Module
//!
//! Runtime configuration is read from `TS_*` environment variables with
//! sensible defaults, mirroring how the server process is deployed in
//! containers. The parsing core is a plain lookup function so tests can
//! feed variables without touching process-global environment state.
//!
//! | Variable            | Default   | Meaning                          |
//! |---------------------|-----------|----------------------------------|
//! | `TS_DATA_PATH`      | `/data`   | Storage root directory           |
//! | `TS_HOST`           | `0.0.0.0` | Bind address                     |
//! | `TS_PORT`           | `8383`    | Bind port                        |
//! | `TS_API_BASE_PATH`  | `/`       | URL prefix                       |
//! | `TS_API_TOKEN`      | *(empty)* | Bootstrap token; empty = no auth |
//! | `TS_CERT_PATH`      | *(empty)* | TLS certificate                  |
//! | `TS_CERT_KEY_PATH`  | *(empty)* | TLS private key                  |
//! | `TS_LOG_LEVEL`      | `INFO`    | TRACE/DEBUG/INFO/WARN/ERROR      |

#[cfg(test)]
mod tests;

use std::{env, fmt, path::PathBuf};

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced while reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable holds a value that does not parse.
    #[error("invalid value '{value}' for {variable}: {reason}")]
    InvalidValue {
        /// The environment variable name.
        variable: &'static str,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// Log level
// ------------------------------------------------------------------------------------------------

/// Log verbosity, ordered from most to least chatty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parses the uppercase names used in `TS_LOG_LEVEL`.
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Config
// ------------------------------------------------------------------------------------------------

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Storage root directory.
    pub data_path: PathBuf,

    /// Bind address for the serving layer.
    pub host: String,

    /// Bind port for the serving layer.
    pub port: u16,

    /// URL prefix for the serving layer.
    pub api_base_path: String,

    /// Bootstrap API token; empty disables authentication.
    pub api_token: String,

    /// Path to the TLS certificate; empty disables TLS.
    pub cert_path: String,

    /// Path to the TLS private key.
    pub cert_key_path: String,

    /// Log verbosity.
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/data"),
            host: "0.0.0.0".to_string(),
            port: 8383,
            api_base_path: "/".to_string(),
            api_token: String::new(),
            cert_path: String::new(),
            cert_key_path: String::new(),
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match lookup("TS_PORT") {
            None => defaults.port,
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                variable: "TS_PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
        };

        let log_level = match lookup("TS_LOG_LEVEL") {
            None => defaults.log_level,
            Some(raw) => LogLevel::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                variable: "TS_LOG_LEVEL",
                value: raw,
                reason: "expected TRACE, DEBUG, INFO, WARN or ERROR".to_string(),
            })?,
        };

        Ok(Self {
            data_path: lookup("TS_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            host: lookup("TS_HOST").unwrap_or(defaults.host),
            port,
            api_base_path: lookup("TS_API_BASE_PATH").unwrap_or(defaults.api_base_path),
            api_token: lookup("TS_API_TOKEN").unwrap_or(defaults.api_token),
            cert_path: lookup("TS_CERT_PATH").unwrap_or(defaults.cert_path),
            cert_key_path: lookup("TS_CERT_KEY_PATH").unwrap_or(defaults.cert_key_path),
            log_level,
        })
    }
}
