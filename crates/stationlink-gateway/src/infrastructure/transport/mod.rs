//! Concrete byte-stream transports.
//!
//! - [`TcpTransport`] – a device (or a terminal server in front of one)
//!   reachable over TCP.
//! - `SerialTransport` – a device on a local serial line.  Needs the
//!   `serial` cargo feature.

pub mod serial;
pub mod tcp;

use std::time::Duration;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use crate::application::transport::{Transport, TransportError};
use crate::infrastructure::storage::config::{TransportConfig, TransportKind};

/// Builds the transport selected by `config`.  The transport is not opened.
///
/// # Errors
///
/// Returns [`TransportError::Unsupported`] when a serial transport is
/// requested from a build without the `serial` feature.
pub fn from_config(config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    match config.kind {
        TransportKind::Tcp => Ok(Box::new(TcpTransport::new(
            format!("{}:{}", config.host, config.port),
            connect_timeout,
        ))),
        TransportKind::Serial => serial::build(&config.device, config.baud_rate),
    }
}
