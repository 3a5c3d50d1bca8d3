//! The byte-stream port the session drives.
//!
//! The session does not care whether bytes travel over TCP or a serial line;
//! it only needs to open, close, write, and read with a timeout.  Concrete
//! adapters live in `infrastructure::transport`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {after:?} connecting to {endpoint}")]
    ConnectTimeout { endpoint: String, after: Duration },

    /// The peer closed the connection (end of stream).
    #[error("connection closed by device")]
    Closed,

    #[error("transport is not open")]
    NotOpen,

    /// The transport kind is not compiled into this build.
    #[error("unsupported transport: {0}")]
    Unsupported(String),
}

/// Result of one [`Transport::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written into the buffer.
    Data(usize),
    /// Nothing arrived within the timeout.  Not an error.
    Idle,
}

/// A reliable-or-not byte stream to one device.
#[async_trait]
pub trait Transport: Send {
    /// Opens the link, replacing any existing connection.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Closes the link.  Closing an already closed transport is a no-op.
    async fn close(&mut self);

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Reads whatever is available, waiting at most `timeout`.
    ///
    /// End of stream is reported as [`TransportError::Closed`].
    async fn read(&mut self, buf: &mut [u8], timeout: Duration)
        -> Result<ReadOutcome, TransportError>;

    fn is_open(&self) -> bool;

    /// Human-readable endpoint for log lines, e.g. `tcp://10.0.0.5:7700`.
    fn endpoint(&self) -> String;
}
