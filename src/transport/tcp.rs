//! TCP transport.

use super::{spawn_reader, Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};
use crate::descriptor::TransportKind;
use crate::error::{LaError, LaResult};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    writer: Option<OwnedWriteHalf>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    reader_task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host,
            port,
            connect_timeout,
            writer: None,
            events: None,
            reader_task: None,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn open(&mut self) -> LaResult<()> {
        let addr = (self.host.as_str(), self.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| LaError::ConnectTimeout)?
            .map_err(LaError::from)?;

        // Command traffic is small and latency-sensitive.
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.reader_task = Some(spawn_reader(reader, events_tx));
        self.writer = Some(writer);
        self.events = Some(events_rx);

        debug!("TCP connected to {}:{}", self.host, self.port);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> LaResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| LaError::ConnectionLost("transport not open".to_string()))?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        debug!("TCP connection to {}:{} closed", self.host, self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_send_receive_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let mut transport =
            TcpTransport::new(addr.ip().to_string(), addr.port(), Duration::from_secs(5));
        transport.open().await.unwrap();
        let mut events = transport.take_event_receiver().unwrap();

        transport.send(b"ping\n").await.unwrap();
        match events.recv().await.unwrap() {
            TransportEvent::Data(chunk) => assert_eq!(&chunk[..], b"ping\n"),
            other => panic!("unexpected event: {other:?}"),
        }

        server.await.unwrap();
        // Server task finished and dropped its socket: reader reports close.
        match events.recv().await.unwrap() {
            TransportEvent::Closed(_) => {}
            other => panic!("unexpected event: {other:?}"),
        }

        transport.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport =
            TcpTransport::new(addr.ip().to_string(), addr.port(), Duration::from_secs(1));
        assert!(transport.open().await.is_err());
    }
}
