//! Command correlation.
//!
//! The [`Correlator`] turns a frame stream into request/response pairs. Every
//! outbound command is registered in a pending table with a monotonically
//! increasing correlation id and a deadline; inbound frames resolve entries
//! either by id (id-bearing framings) or strictly oldest-first (FIFO framings
//! with no id field). Timeouts and transport loss reject entries, so every
//! registered command eventually resolves or rejects — no caller future is
//! ever leaked.
//!
//! The correlator is plain state owned by the session worker and mutated only
//! on its event loop; callers on other tasks reach it through the worker's
//! message channel rather than a lock.

use crate::error::{LaError, LaResult};
use crate::framing::Frame;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How inbound frames are matched to outstanding commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Frames carry the correlation id back (JSON framing).
    Correlated,
    /// No id on the wire; the oldest pending command is resolved by the next
    /// complete frame (text and binary framings).
    Fifo,
}

struct PendingCommand {
    issued_at: Instant,
    deadline: Instant,
    resolver: oneshot::Sender<LaResult<Frame>>,
}

pub struct Correlator {
    mode: MatchMode,
    next_id: u64,
    pending: HashMap<u64, PendingCommand>,
    /// Send order, for FIFO matching and deterministic drain.
    order: VecDeque<u64>,
    closed: Option<String>,
    unsolicited: u64,
}

impl Correlator {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            next_id: 0,
            pending: HashMap::new(),
            order: VecDeque::new(),
            closed: None,
            unsolicited: 0,
        }
    }

    /// Register a command, handing the supplied resolver to the pending table.
    ///
    /// Returns the correlation id to stamp into the outbound frame. Fails
    /// immediately once the connection is closed — no new sends after loss.
    pub fn register(
        &mut self,
        timeout: Duration,
        resolver: oneshot::Sender<LaResult<Frame>>,
    ) -> LaResult<u64> {
        if let Some(reason) = &self.closed {
            let _ = resolver.send(Err(LaError::ConnectionLost(reason.clone())));
            return Err(LaError::ConnectionLost(reason.clone()));
        }

        let id = self.next_id;
        self.next_id += 1;

        let now = Instant::now();
        self.pending.insert(
            id,
            PendingCommand {
                issued_at: now,
                deadline: now + timeout,
                resolver,
            },
        );
        self.order.push_back(id);
        Ok(id)
    }

    /// Resolve a pending command with an inbound frame.
    ///
    /// Frames with no matching entry are discarded as unsolicited.
    pub fn resolve(&mut self, frame: Frame) {
        let id = match self.mode {
            MatchMode::Correlated => frame.id,
            MatchMode::Fifo => self.order.front().copied(),
        };

        let entry = id.and_then(|id| {
            self.order.retain(|&queued| queued != id);
            self.pending.remove(&id)
        });

        match entry {
            Some(cmd) => {
                debug!(
                    "Command {} resolved after {:?}",
                    id.unwrap_or_default(),
                    cmd.issued_at.elapsed()
                );
                let _ = cmd.resolver.send(Ok(frame));
            }
            None => {
                self.unsolicited += 1;
                debug!("Discarding unsolicited frame: {frame:?}");
            }
        }
    }

    /// Reject a command that could not be transmitted.
    pub fn fail(&mut self, id: u64, error: LaError) {
        self.order.retain(|&queued| queued != id);
        if let Some(cmd) = self.pending.remove(&id) {
            let _ = cmd.resolver.send(Err(error));
        }
    }

    /// Reject every pending command whose deadline has passed.
    pub fn expire(&mut self, now: Instant) {
        let overdue: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, cmd)| cmd.deadline <= now)
            .map(|(&id, _)| id)
            .collect();

        for id in overdue {
            debug!("Command {id} timed out");
            self.fail(id, LaError::CommandTimeout);
        }
    }

    /// Earliest pending deadline, for the worker's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|cmd| cmd.deadline).min()
    }

    /// Reject everything outstanding with `ConnectionLost` and refuse further
    /// registrations. Idempotent — the drain happens exactly once.
    pub fn close(&mut self, reason: &str) {
        if self.closed.is_some() {
            return;
        }
        self.closed = Some(reason.to_string());

        let drained = std::mem::take(&mut self.pending);
        self.order.clear();
        for (id, cmd) in drained {
            debug!("Rejecting pending command {id}: connection lost");
            let _ = cmd
                .resolver
                .send(Err(LaError::ConnectionLost(reason.to_string())));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn unsolicited_frames(&self) -> u64 {
        self.unsolicited
    }
}
