#![deny(unsafe_code)]

//! Configuration loading and validation for handyd.
//!
//! Loads an optional TOML file and validates it. [`AppConfig`] is the
//! central configuration structure shared by the daemon and the forwarder.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// File name of the control socket inside the temp directory.
pub const SOCKET_FILENAME: &str = "handyd.sock";

/// File name of the daemon log inside the temp directory.
pub const LOG_FILENAME: &str = "handyd.log";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the daemon and the servers it hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path of the control socket. Defaults to `<temp dir>/handyd.sock`.
    #[serde(default)]
    pub socket_path: Option<String>,

    /// Address every hosted file server binds on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// First port probed when a request names no port and none was used yet.
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last port probed (inclusive).
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    /// How long shutdown waits for listeners to drain, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            bind_addr: default_bind_addr(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port_range_start() -> u16 {
    9696
}

fn default_port_range_end() -> u16 {
    9999
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path. Defaults to `<temp dir>/handyd.log`.
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), "Loaded config file");
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.bind_addr.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "daemon.bind_addr must be an IP address, got {:?}",
                self.daemon.bind_addr
            )));
        }
        if self.daemon.port_range_start == 0 {
            return Err(ConfigError::Validation(
                "daemon.port_range_start must be non-zero".to_string(),
            ));
        }
        if self.daemon.port_range_start > self.daemon.port_range_end {
            return Err(ConfigError::Validation(format!(
                "daemon.port_range_start ({}) must not exceed daemon.port_range_end ({})",
                self.daemon.port_range_start, self.daemon.port_range_end
            )));
        }
        if matches!(&self.daemon.socket_path, Some(p) if p.is_empty()) {
            return Err(ConfigError::Validation(
                "daemon.socket_path must not be empty".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    /// The well-known control socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.daemon
            .socket_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(SOCKET_FILENAME))
    }

    /// The log file path.
    pub fn log_path(&self) -> PathBuf {
        self.logging
            .file
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(LOG_FILENAME))
    }

    /// Address hosted servers bind on. Falls back to all interfaces if unparsable.
    pub fn bind_addr(&self) -> IpAddr {
        self.daemon
            .bind_addr
            .parse()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }

    /// Ports probed when no port is known yet.
    pub fn port_range(&self) -> std::ops::RangeInclusive<u16> {
        self.daemon.port_range_start..=self.daemon.port_range_end
    }

    /// Drain bound applied to listeners on shutdown.
    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.daemon.shutdown_grace_ms)
    }
}
