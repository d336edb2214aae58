//! Server configuration module.
//!
//! Parses configuration from environment variables for the FIM dashboard API.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 8080 | HTTP server port |
//! | `FIM_DB_PATH` | No | `~/.fim/fim.db` | Event store written by the monitor |
//! | `FIM_REPLICA_URL` | No | - | Reported by `/api/status` when set |

use std::env;
use std::path::PathBuf;

use directories::BaseDirs;
use thiserror::Error;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default data directory name relative to home.
const DEFAULT_DATA_DIR: &str = ".fim";

/// Default database file name inside the data directory.
const DEFAULT_DB_FILE: &str = "fim.db";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Path to the SQLite event store.
    pub db_path: PathBuf,

    /// Whether the monitor is configured to replicate events.
    pub replication_enabled: bool,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `PORT` is not a valid u16
    /// - `FIM_DB_PATH` is unset and the home directory cannot be determined
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fim_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;
        let db_path = match env::var("FIM_DB_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => BaseDirs::new()
                .ok_or(ConfigError::NoHomeDirectory)?
                .home_dir()
                .join(DEFAULT_DATA_DIR)
                .join(DEFAULT_DB_FILE),
        };
        let replication_enabled = env::var("FIM_REPLICA_URL")
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false);

        Ok(Self {
            port,
            db_path,
            replication_enabled,
        })
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}
