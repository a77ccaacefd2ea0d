//! Device session: public handle and worker event loop.
//!
//! A [`DeviceSession`] is the uniform contract over heterogeneous hardware:
//! connect, query capability/status, run a timed capture, disconnect. Each
//! connection runs one worker task that owns the transport, the frame codec,
//! the command correlator, and the single-capture guard. Callers never touch
//! that state directly — every operation marshals into the worker as a
//! [`SessionRequest`] carrying a oneshot response channel, so all mutation
//! happens on the connection's own event loop.
//!
//! # Message Flow
//!
//! ```text
//! Caller task                        Worker task
//! -----------                        -----------
//! 1. Create request with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Register in correlator /
//!                                       guard + spawn capture
//!                                    4. Respond via oneshot
//! 5. Await oneshot receiver   <------
//! ```
//!
//! `start_capture` returns only the immediate accept/reject; the eventual
//! [`CaptureOutcome`] arrives on the returned single-shot [`CaptureHandle`].

use crate::capture::{self, CaptureOutcome, CaptureSession, CaptureState};
use crate::config::{DeviceSettings, ProtocolFamily, TimeoutSettings};
use crate::correlator::{Correlator, MatchMode};
use crate::descriptor::DeviceDescriptor;
use crate::error::{LaError, LaResult};
use crate::framing::{make_codec, CommandBody, Frame, FrameCodec};
use crate::negotiator;
use crate::profile::{command_set, CommandSet};
use crate::transport::{self, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Single-shot channel delivering the one [`CaptureOutcome`] a capture owes.
pub type CaptureHandle = oneshot::Receiver<CaptureOutcome>;

/// Point-in-time session snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub capture_state: CaptureState,
    pub pending_commands: usize,
    pub unsolicited_frames: u64,
    pub connected_at: DateTime<Utc>,
}

/// Requests marshaled into the worker. Each variant embeds the oneshot
/// responder for its immediate result.
pub(crate) enum SessionRequest {
    Command {
        body: CommandBody,
        timeout: Duration,
        response: oneshot::Sender<LaResult<Frame>>,
    },
    StartCapture {
        session: CaptureSession,
        response: oneshot::Sender<LaResult<CaptureHandle>>,
    },
    StopCapture {
        response: oneshot::Sender<bool>,
    },
    Status {
        response: oneshot::Sender<SessionStatus>,
    },
    /// Installed once after capability negotiation.
    AdoptDescriptor { descriptor: DeviceDescriptor },
    /// Sent by the capture runner as it finishes, clearing the busy guard.
    CaptureFinished,
    Disconnect {
        response: oneshot::Sender<()>,
    },
}

/// Cloneable submission handle for correlated commands; used by the public
/// session API, the capability negotiator, and the capture runner.
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl CommandHandle {
    /// Send one command and await its correlated response.
    pub async fn command(&self, body: CommandBody, timeout: Duration) -> LaResult<Frame> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Command {
                body,
                timeout,
                response,
            })
            .await
            .map_err(|_| LaError::ConnectionLost("session closed".to_string()))?;
        rx.await
            .map_err(|_| LaError::ConnectionLost("session closed".to_string()))?
    }
}

struct ActiveCapture {
    cancel: watch::Sender<bool>,
    state: watch::Receiver<CaptureState>,
}

/// Worker tick when no command deadline is armed.
const IDLE_TICK: Duration = Duration::from_secs(1);

struct SessionWorker {
    transport: Box<dyn Transport>,
    codec: Box<dyn FrameCodec>,
    correlator: Correlator,
    commands: Arc<dyn CommandSet>,
    timeouts: TimeoutSettings,
    descriptor: DeviceDescriptor,
    /// Weak so the worker's own handle does not keep the loop alive after
    /// every caller handle is gone.
    internal: mpsc::WeakSender<SessionRequest>,
    capture: Option<ActiveCapture>,
    connected_at: DateTime<Utc>,
    closed: bool,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<SessionRequest>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            let deadline = self
                .correlator
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_TICK);

            tokio::select! {
                maybe_request = requests.recv() => {
                    match maybe_request {
                        Some(request) => {
                            if self.handle_request(request).await.is_break() {
                                break;
                            }
                        }
                        // Every handle dropped: tear the session down.
                        None => break,
                    }
                }
                maybe_event = events.recv(), if !self.closed => {
                    match maybe_event {
                        Some(TransportEvent::Data(chunk)) => self.handle_data(&chunk),
                        Some(TransportEvent::Closed(reason)) => self.handle_closed(&reason),
                        None => self.handle_closed("event channel closed"),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.correlator.expire(Instant::now());
                }
            }
        }

        self.transport.close().await;
        self.correlator.close("session closed");
        debug!("Session worker stopped");
    }

    async fn handle_request(&mut self, request: SessionRequest) -> ControlFlow<()> {
        match request {
            SessionRequest::Command {
                body,
                timeout,
                response,
            } => {
                self.dispatch_command(body, timeout, response).await;
            }
            SessionRequest::StartCapture { session, response } => {
                let result = self.start_capture(session);
                let _ = response.send(result);
            }
            SessionRequest::StopCapture { response } => {
                let stopped = self.stop_capture().await;
                let _ = response.send(stopped);
            }
            SessionRequest::Status { response } => {
                let _ = response.send(self.status());
            }
            SessionRequest::AdoptDescriptor { descriptor } => {
                self.descriptor = descriptor;
            }
            SessionRequest::CaptureFinished => {
                self.capture = None;
            }
            SessionRequest::Disconnect { response } => {
                self.transport.close().await;
                self.correlator.close("session closed");
                let _ = response.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Register, encode, and transmit one command. The responder goes
    /// straight into the correlator's pending table.
    async fn dispatch_command(
        &mut self,
        body: CommandBody,
        timeout: Duration,
        response: oneshot::Sender<LaResult<Frame>>,
    ) {
        let id = match self.correlator.register(timeout, response) {
            Ok(id) => id,
            // register already rejected the responder.
            Err(_) => return,
        };

        let stamped = if self.codec.id_bearing() { Some(id) } else { None };
        let wire = match self.codec.encode(&body, stamped) {
            Ok(wire) => wire,
            Err(e) => {
                self.correlator.fail(id, e);
                return;
            }
        };

        if let Err(e) = self.transport.send(&wire).await {
            self.correlator.fail(id, e);
        }
    }

    /// Guard, validate, and spawn the capture runner.
    ///
    /// The busy check precedes validation: a second `start_capture` returns
    /// `Busy` without inspecting the plan, and a rejected plan issues no
    /// device command at all.
    fn start_capture(&mut self, session: CaptureSession) -> LaResult<CaptureHandle> {
        if self.capture.is_some() {
            return Err(LaError::Busy);
        }
        capture::validate(&session, &self.descriptor)?;

        let internal = self
            .internal
            .upgrade()
            .ok_or_else(|| LaError::ConnectionLost("session closed".to_string()))?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(CaptureState::Validating);

        let handle = CommandHandle {
            tx: internal.clone(),
        };
        let commands = self.commands.clone();
        let timeouts = self.timeouts;
        tokio::spawn(async move {
            let outcome =
                capture::run_capture(session, handle, commands, timeouts, cancel_rx, state_tx)
                    .await;
            // Clear the busy guard before the outcome lands, so a caller that
            // awaited the outcome can start the next capture immediately.
            let _ = internal.send(SessionRequest::CaptureFinished).await;
            let _ = outcome_tx.send(outcome);
        });

        self.capture = Some(ActiveCapture {
            cancel: cancel_tx,
            state: state_rx,
        });
        Ok(outcome_rx)
    }

    /// Best-effort device stop plus cooperative cancellation of the runner.
    /// The runner still emits the one outcome it owes.
    async fn stop_capture(&mut self) -> bool {
        let Some(active) = &self.capture else {
            return false;
        };
        let _ = active.cancel.send(true);

        if !self.correlator.is_closed() {
            let body = self.commands.stop();
            let timeout = self.timeouts.command;
            // Fire-and-forget: the dropped receiver discards the ack.
            let (ack_tx, _ack_rx) = oneshot::channel();
            self.dispatch_command(body, timeout, ack_tx).await;
        }
        true
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            connected: !self.closed,
            capture_state: self
                .capture
                .as_ref()
                .map(|c| *c.state.borrow())
                .unwrap_or(CaptureState::Idle),
            pending_commands: self.correlator.pending_len(),
            unsolicited_frames: self.correlator.unsolicited_frames(),
            connected_at: self.connected_at,
        }
    }

    fn handle_data(&mut self, chunk: &[u8]) {
        self.codec.push(chunk);
        while let Some(result) = self.codec.next_frame() {
            match result {
                Ok(frame) => self.correlator.resolve(frame),
                Err(e) => warn!("Dropping damaged frame: {e}"),
            }
        }
    }

    fn handle_closed(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        warn!("Transport closed: {reason}");
        // Drains every pending command with ConnectionLost, exactly once. An
        // active capture fails on its next command, within one poll interval.
        self.correlator.close(reason);
    }
}

/// Handle to one connected device.
pub struct DeviceSession {
    handle: CommandHandle,
    descriptor: DeviceDescriptor,
    timeouts: TimeoutSettings,
}

impl DeviceSession {
    /// Open the configured transport, negotiate capabilities, and return a
    /// ready session.
    pub async fn connect(device: &DeviceSettings, timeouts: TimeoutSettings) -> LaResult<Self> {
        let transport = transport::build(&device.transport, timeouts.connect)?;
        Self::connect_with_transport(transport, device.protocol, timeouts).await
    }

    /// Connect over an already-constructed transport. This is how tests and
    /// the CLI's `mock` target inject the in-memory transport.
    pub async fn connect_with_transport(
        mut transport: Box<dyn Transport>,
        protocol: ProtocolFamily,
        timeouts: TimeoutSettings,
    ) -> LaResult<Self> {
        transport.open().await?;
        let events = transport.take_event_receiver().ok_or_else(|| {
            LaError::Unexpected("Transport produced no event stream".to_string())
        })?;

        let codec = make_codec(protocol);
        let mode = if codec.id_bearing() {
            MatchMode::Correlated
        } else {
            MatchMode::Fifo
        };
        let commands = command_set(protocol);
        let kind = transport.kind();

        let (request_tx, request_rx) = mpsc::channel(32);
        let worker = SessionWorker {
            transport,
            codec,
            correlator: Correlator::new(mode),
            commands: commands.clone(),
            timeouts,
            descriptor: DeviceDescriptor::fallback(kind),
            internal: request_tx.downgrade(),
            capture: None,
            connected_at: Utc::now(),
            closed: false,
        };
        tokio::spawn(worker.run(request_rx, events));

        let handle = CommandHandle { tx: request_tx };
        let descriptor = negotiator::negotiate(&handle, commands.as_ref(), kind, &timeouts).await;
        info!(
            "Connected to {} (firmware {})",
            descriptor.name, descriptor.firmware_version
        );
        let _ = handle
            .tx
            .send(SessionRequest::AdoptDescriptor {
                descriptor: descriptor.clone(),
            })
            .await;

        Ok(Self {
            handle,
            descriptor,
            timeouts,
        })
    }

    /// The capability descriptor negotiated at connect time.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Send a raw device command, correlated like any other. Usable
    /// concurrently with an active capture.
    pub async fn send_command(&self, body: CommandBody) -> LaResult<Frame> {
        self.handle.command(body, self.timeouts.command).await
    }

    /// Start a capture. Returns the outcome handle on acceptance, or
    /// `Busy`/`BadParams` synchronously — a rejection has no side effect on
    /// the device.
    pub async fn start_capture(&self, session: CaptureSession) -> LaResult<CaptureHandle> {
        let (response, rx) = oneshot::channel();
        self.handle
            .tx
            .send(SessionRequest::StartCapture { session, response })
            .await
            .map_err(|_| LaError::ConnectionLost("session closed".to_string()))?;
        rx.await
            .map_err(|_| LaError::ConnectionLost("session closed".to_string()))?
    }

    /// Stop an active capture. Returns whether one was active. The stopped
    /// capture still delivers its single outcome on the existing handle.
    pub async fn stop_capture(&self) -> bool {
        let (response, rx) = oneshot::channel();
        if self
            .handle
            .tx
            .send(SessionRequest::StopCapture { response })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Current session snapshot.
    pub async fn status(&self) -> LaResult<SessionStatus> {
        let (response, rx) = oneshot::channel();
        self.handle
            .tx
            .send(SessionRequest::Status { response })
            .await
            .map_err(|_| LaError::ConnectionLost("session closed".to_string()))?;
        rx.await
            .map_err(|_| LaError::ConnectionLost("session closed".to_string()))
    }

    /// Close the transport and tear the worker down. Pending commands reject
    /// with `ConnectionLost`.
    pub async fn disconnect(self) {
        let (response, rx) = oneshot::channel();
        if self
            .handle
            .tx
            .send(SessionRequest::Disconnect { response })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_handle_fails_when_worker_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = CommandHandle { tx };
        let result = handle
            .command(CommandBody::Text("STAT?".to_string()), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(LaError::ConnectionLost(_))));
    }
}
