//! Byte transports.
//!
//! A [`Transport`] opens a byte-oriented channel to the device and exposes raw
//! send plus a stream of [`TransportEvent`]s: data chunks in arrival order,
//! then exactly one `Closed` when the connection goes away. Opening is bounded
//! by the configured connect timeout and fails with `ConnectTimeout`,
//! releasing anything partially constructed.
//!
//! Implementations: TCP and UDP (always available), serial behind the
//! `transport_serial` feature, and an in-memory mock for tests and
//! hardware-free runs.

pub mod mock;
#[cfg(feature = "transport_serial")]
pub mod serial;
pub mod tcp;
pub mod udp;

use crate::config::TransportConfig;
use crate::descriptor::TransportKind;
use crate::error::{LaError, LaResult};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the inbound event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Inbound transport notification.
#[derive(Debug)]
pub enum TransportEvent {
    /// A chunk of raw bytes, in arrival order. Chunk boundaries are
    /// arbitrary — framing is the codec's job.
    Data(Bytes),
    /// The connection is gone; emitted exactly once, with a reason.
    Closed(String),
}

/// A byte-oriented channel to the device.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Open the channel, bounded by the connect timeout.
    async fn open(&mut self) -> LaResult<()>;

    /// Send raw bytes.
    async fn send(&mut self, bytes: &[u8]) -> LaResult<()>;

    /// Take the inbound event receiver. Can only be taken once.
    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;

    /// Close the channel and release resources.
    async fn close(&mut self);
}

/// Build a transport from configuration.
///
/// The mock transport is excluded here — it is constructed in pairs via
/// [`mock::pair`] so the caller keeps the device end.
pub fn build(
    config: &TransportConfig,
    connect_timeout: std::time::Duration,
) -> LaResult<Box<dyn Transport>> {
    match config {
        #[cfg(feature = "transport_serial")]
        TransportConfig::Serial { port, baud_rate } => Ok(Box::new(serial::SerialTransport::new(
            port.clone(),
            *baud_rate,
        ))),
        #[cfg(not(feature = "transport_serial"))]
        TransportConfig::Serial { .. } => Err(LaError::SerialFeatureDisabled),
        TransportConfig::Tcp { host, port } => Ok(Box::new(tcp::TcpTransport::new(
            host.clone(),
            *port,
            connect_timeout,
        ))),
        TransportConfig::Udp { host, port } => Ok(Box::new(udp::UdpTransport::new(
            host.clone(),
            *port,
            connect_timeout,
        ))),
        TransportConfig::Mock => Err(LaError::Config(
            "Mock transport must be constructed with transport::mock::pair".to_string(),
        )),
    }
}

/// Forward chunks from an async reader into the event channel until EOF or
/// error, then emit the single `Closed` event.
pub(crate) fn spawn_reader<R>(
    mut reader: R,
    events: mpsc::Sender<TransportEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let _ = events
                        .send(TransportEvent::Closed(
                            "connection closed by peer".to_string(),
                        ))
                        .await;
                    break;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(TransportEvent::Data(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = events
                        .send(TransportEvent::Closed(format!("read error: {e}")))
                        .await;
                    break;
                }
            }
        }
    })
}
