//! In-memory mock transport.
//!
//! [`pair`] yields the driver end (a [`Transport`] implementation) and the
//! device end (a [`MockRemote`]) of an in-memory link. Tests and the CLI's
//! `mock` target script the device end — typically by handing it to
//! [`MockAnalyzer`](crate::mock_device::MockAnalyzer) — while the session
//! drives the transport end exactly as it would a socket or serial port.

use super::{Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};
use crate::descriptor::TransportKind;
use crate::error::{LaError, LaResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct MockTransport {
    to_device: mpsc::Sender<Bytes>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    sent: Arc<AtomicUsize>,
    open: bool,
}

/// Device end of the mock link.
pub struct MockRemote {
    from_driver: mpsc::Receiver<Bytes>,
    events_tx: mpsc::Sender<TransportEvent>,
}

/// Create a connected (driver, device) pair.
pub fn pair() -> (MockTransport, MockRemote) {
    let (to_device, from_driver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let transport = MockTransport {
        to_device,
        events: Some(events_rx),
        sent: Arc::new(AtomicUsize::new(0)),
        open: false,
    };
    let remote = MockRemote {
        from_driver,
        events_tx,
    };
    (transport, remote)
}

impl MockTransport {
    /// Shared counter of `send` calls, for asserting that an operation issued
    /// no commands. Grab it before handing the transport to a session.
    pub fn sent_counter(&self) -> Arc<AtomicUsize> {
        self.sent.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn open(&mut self) -> LaResult<()> {
        self.open = true;
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> LaResult<()> {
        if !self.open {
            return Err(LaError::ConnectionLost("transport not open".to_string()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.to_device
            .send(Bytes::copy_from_slice(bytes))
            .await
            .map_err(|_| LaError::ConnectionLost("mock peer gone".to_string()))
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

impl MockRemote {
    /// Next chunk the driver sent, or `None` once the driver is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_driver.recv().await
    }

    /// Deliver bytes to the driver.
    pub async fn reply(&self, bytes: impl Into<Bytes>) {
        let _ = self.events_tx.send(TransportEvent::Data(bytes.into())).await;
    }

    /// Simulate connection loss.
    pub async fn hang_up(&self, reason: &str) {
        let _ = self
            .events_tx
            .send(TransportEvent::Closed(reason.to_string()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut transport, mut remote) = pair();
        transport.open().await.unwrap();
        let mut events = transport.take_event_receiver().unwrap();

        transport.send(b"*IDN?\n").await.unwrap();
        assert_eq!(&remote.recv().await.unwrap()[..], b"*IDN?\n");

        remote.reply(Bytes::from_static(b"MOCK,1.0\n")).await;
        match events.recv().await.unwrap() {
            TransportEvent::Data(chunk) => assert_eq!(&chunk[..], b"MOCK,1.0\n"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sent_counter() {
        let (mut transport, _remote) = pair();
        let counter = transport.sent_counter();
        transport.open().await.unwrap();
        transport.send(b"a").await.unwrap();
        transport.send(b"b").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (mut transport, _remote) = pair();
        assert!(transport.send(b"x").await.is_err());
    }
}
