//! TCP transport.
//!
//! Devices that speak the link protocol natively over Ethernet, and serial
//! devices sitting behind a terminal server, are both reached this way.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info};

use crate::application::transport::{ReadOutcome, Transport, TransportError};

/// A [`Transport`] over one `tokio::net::TcpStream`.
#[derive(Debug)]
pub struct TcpTransport {
    /// `host:port`, resolved on every `open`.
    addr: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.close().await;

        let stream = time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                endpoint: self.endpoint(),
                after: self.connect_timeout,
            })??;
        stream.set_nodelay(true)?;

        info!("connected to {}", self.addr);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("error shutting down {}: {e}", self.addr);
            }
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream.write_all(data).await?;
        Ok(())
    }

    async fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<ReadOutcome, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        match time::timeout(timeout, stream.read(buf)).await {
            Err(_) => Ok(ReadOutcome::Idle),
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(n)) => Ok(ReadOutcome::Data(n)),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_before_open_is_not_open() {
        let mut transport = TcpTransport::new("127.0.0.1:1", Duration::from_millis(100));
        let mut buf = [0u8; 8];

        let result = transport.read(&mut buf, Duration::from_millis(10)).await;

        assert!(matches!(result, Err(TransportError::NotOpen)));
    }

    #[tokio::test]
    async fn test_write_read_then_end_of_stream() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
            // Dropping the socket ends the stream.
        });
        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(1));
        transport.open().await.unwrap();
        let mut buf = [0u8; 16];

        // Act
        transport.write_all(b"abc").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 3 {
            let outcome = transport.read(&mut buf, Duration::from_secs(1)).await;
            if let ReadOutcome::Data(n) = outcome.unwrap() {
                received.extend_from_slice(&buf[..n]);
            }
        }
        peer.await.unwrap();
        let after_close = transport.read(&mut buf, Duration::from_secs(1)).await;

        // Assert
        assert_eq!(received, b"abc");
        assert!(matches!(after_close, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_read_times_out_as_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _peer = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });
        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(1));
        transport.open().await.unwrap();
        let mut buf = [0u8; 16];

        let result = transport.read(&mut buf, Duration::from_millis(20)).await;

        assert!(matches!(result, Ok(ReadOutcome::Idle)));
        transport.close().await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_connection_refused_is_io_error() {
        // Bind then drop to get a port nothing is listening on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(1));

        let result = transport.open().await;

        assert!(matches!(result, Err(TransportError::Io(_))));
        assert!(!transport.is_open());
    }
}
