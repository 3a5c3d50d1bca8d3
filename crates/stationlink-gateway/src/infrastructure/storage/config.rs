//! TOML-based configuration for the gateway.
//!
//! ```toml
//! log_level = "info"
//!
//! [transport]
//! kind = "tcp"            # or "serial"
//! host = "127.0.0.1"
//! port = 7700
//! device = "/dev/ttyUSB0"
//! baud_rate = 115200
//! connect_timeout_ms = 3000
//!
//! [session]
//! response_timeout_ms = 2000
//! heartbeat_interval_ms = 10000
//! reconnect_delay_ms = 2000
//! max_reconnect_attempts = 0     # 0 = retry forever
//! poll_interval_ms = 50
//! crc_failure_threshold = 0      # 0 = never reconnect because of CRC errors
//! max_payload_len = 65535
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a missing file, a
//! missing section, or a missing key all fall back to the values above.  An
//! empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stationlink_core::protocol::messages::MAX_PAYLOAD_LEN;
use thiserror::Error;

use crate::application::session::SessionConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parse but cannot be used together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Serial,
}

/// Where the device is and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_kind")]
    pub kind: TransportKind,
    /// TCP only.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP only.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serial only.
    #[serde(default = "default_device")]
    pub device: String,
    /// Serial only.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Session timing as stored on disk, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub crc_failure_threshold: u32,
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_kind() -> TransportKind {
    TransportKind::Tcp
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7700
}
fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_response_timeout_ms() -> u64 {
    2000
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_max_payload_len() -> usize {
    MAX_PAYLOAD_LEN
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            transport: TransportConfig::default(),
            session: SessionSettings::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            host: default_host(),
            port: default_port(),
            device: default_device(),
            baud_rate: default_baud_rate(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            poll_interval_ms: default_poll_interval_ms(),
            crc_failure_threshold: 0,
            max_payload_len: default_max_payload_len(),
        }
    }
}

impl GatewayConfig {
    /// Rejects values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        let nonzero = [
            ("session.response_timeout_ms", s.response_timeout_ms),
            ("session.heartbeat_interval_ms", s.heartbeat_interval_ms),
            ("session.poll_interval_ms", s.poll_interval_ms),
            ("transport.connect_timeout_ms", self.transport.connect_timeout_ms),
        ];
        if let Some((key, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be greater than 0")));
        }
        if s.max_payload_len > MAX_PAYLOAD_LEN {
            return Err(ConfigError::Invalid(format!(
                "session.max_payload_len must be at most {MAX_PAYLOAD_LEN}"
            )));
        }
        if self.transport.kind == TransportKind::Tcp && self.transport.host.is_empty() {
            return Err(ConfigError::Invalid("transport.host must not be empty".into()));
        }
        Ok(())
    }
}

impl SessionSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            crc_failure_threshold: self.crc_failure_threshold,
            max_payload_len: self.max_payload_len,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `GatewayConfig` from `path`, returning `GatewayConfig::default()` if
/// the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GatewayConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &GatewayConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
