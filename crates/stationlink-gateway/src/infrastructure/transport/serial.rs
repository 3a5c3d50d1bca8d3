//! Serial-line transport.
//!
//! Built on `tokio-serial` when the `serial` feature is enabled.  Without the
//! feature, [`build`] returns [`TransportError::Unsupported`].

use crate::application::transport::{Transport, TransportError};

#[cfg(feature = "serial")]
pub use enabled::SerialTransport;

#[cfg(feature = "serial")]
mod enabled {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time;
    use tokio_serial::{SerialPortBuilderExt, SerialStream};
    use tracing::info;

    use super::{Transport, TransportError};
    use crate::application::transport::ReadOutcome;

    /// A [`Transport`] over a local serial port, 8N1 with no flow control.
    pub struct SerialTransport {
        path: String,
        baud_rate: u32,
        port: Option<SerialStream>,
    }

    impl SerialTransport {
        pub fn new(path: &str, baud_rate: u32) -> Self {
            Self {
                path: path.to_string(),
                baud_rate,
                port: None,
            }
        }
    }

    #[async_trait]
    impl Transport for SerialTransport {
        async fn open(&mut self) -> Result<(), TransportError> {
            self.port = None;
            let port = tokio_serial::new(&self.path, self.baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| TransportError::Io(e.into()))?;
            info!(baud = self.baud_rate, "opened serial port {}", self.path);
            self.port = Some(port);
            Ok(())
        }

        async fn close(&mut self) {
            self.port = None;
        }

        async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
            let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
            port.write_all(data).await?;
            Ok(())
        }

        async fn read(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> Result<ReadOutcome, TransportError> {
            let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
            match time::timeout(timeout, port.read(buf)).await {
                Err(_) => Ok(ReadOutcome::Idle),
                Ok(Ok(0)) => Err(TransportError::Closed),
                Ok(Ok(n)) => Ok(ReadOutcome::Data(n)),
                Ok(Err(e)) => Err(e.into()),
            }
        }

        fn is_open(&self) -> bool {
            self.port.is_some()
        }

        fn endpoint(&self) -> String {
            format!("serial://{}@{}", self.path, self.baud_rate)
        }
    }
}

/// Builds a serial transport for `path` at `baud_rate`.  The port is not
/// opened yet.
///
/// # Errors
///
/// Returns [`TransportError::Unsupported`] when built without the `serial`
/// feature.
#[cfg(feature = "serial")]
pub fn build(path: &str, baud_rate: u32) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(SerialTransport::new(path, baud_rate)))
}

#[cfg(not(feature = "serial"))]
pub fn build(path: &str, _baud_rate: u32) -> Result<Box<dyn Transport>, TransportError> {
    Err(TransportError::Unsupported(format!(
        "serial port {path}: rebuild with `--features serial`"
    )))
}
