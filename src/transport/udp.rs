//! UDP transport.
//!
//! Binds an ephemeral local endpoint and connects the socket to the device
//! address before the first send, so replies can be received on the same
//! five-tuple. UDP has no connection-loss signal; `Closed` is only emitted on
//! a socket error.

use super::{Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};
use crate::descriptor::TransportKind;
use crate::error::{LaError, LaResult};
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct UdpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    socket: Option<Arc<UdpSocket>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    reader_task: Option<JoinHandle<()>>,
}

impl UdpTransport {
    pub fn new(host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host,
            port,
            connect_timeout,
            socket: None,
            events: None,
            reader_task: None,
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn open(&mut self) -> LaResult<()> {
        let addr = (self.host.clone(), self.port);
        let bind_and_connect = async {
            let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
            socket.connect(addr).await?;
            Ok::<_, std::io::Error>(socket)
        };

        let socket = tokio::time::timeout(self.connect_timeout, bind_and_connect)
            .await
            .map_err(|_| LaError::ConnectTimeout)?
            .map_err(LaError::from)?;
        let socket = Arc::new(socket);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader_socket = socket.clone();
        self.reader_task = Some(tokio::spawn(async move {
            // Large enough for any single datagram this protocol family uses.
            let mut buf = vec![0u8; 65_536];
            loop {
                match reader_socket.recv(&mut buf).await {
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if events_tx.send(TransportEvent::Data(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = events_tx
                            .send(TransportEvent::Closed(format!("recv error: {e}")))
                            .await;
                        break;
                    }
                }
            }
        }));
        self.events = Some(events_rx);
        self.socket = Some(socket);

        debug!("UDP socket connected to {}:{}", self.host, self.port);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> LaResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| LaError::ConnectionLost("transport not open".to_string()))?;
        socket.send(bytes).await?;
        Ok(())
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    async fn close(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.socket = None;
        debug!("UDP socket to {}:{} closed", self.host, self.port);
    }
}
