//! Serial transport over `tokio-serial`.

use super::{spawn_reader, Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};
use crate::descriptor::TransportKind;
use crate::error::{LaError, LaResult};
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    writer: Option<WriteHalf<SerialStream>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    reader_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 115200)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            writer: None,
            events: None,
            reader_task: None,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn open(&mut self) -> LaResult<()> {
        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(self.port_name.as_str(), self.baud_rate)
            .open_native_async()
            .map_err(|e| {
                LaError::Io(format!(
                    "Failed to open serial port '{}' at {} baud: {e}",
                    self.port_name, self.baud_rate
                ))
            })?;

        #[cfg(unix)]
        let _ = stream.set_exclusive(false);

        let (reader, writer) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.reader_task = Some(spawn_reader(reader, events_tx));
        self.writer = Some(writer);
        self.events = Some(events_rx);

        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
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
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.writer = None;
        debug!("Serial port '{}' closed", self.port_name);
    }
}
