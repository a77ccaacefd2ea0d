//! Capture planning, validation, and the capture state machine.
//!
//! A [`CaptureSession`] is the caller-supplied plan for one hardware
//! acquisition. The session worker validates it against the negotiated
//! [`DeviceDescriptor`] (pure — a rejected plan never touches the device),
//! then spawns the capture runner: configure → start → poll → read. The
//! runner owns the single-shot outcome channel, so exactly one
//! [`CaptureOutcome`] is produced per accepted capture regardless of which
//! termination path was taken — completion, device error, capture timeout,
//! `stop_capture`, or transport loss.

use crate::config::TimeoutSettings;
use crate::descriptor::{DeviceDescriptor, TriggerKind};
use crate::error::{LaError, LaResult};
use crate::profile::{CaptureProgress, CommandSet};
use crate::session::CommandHandle;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Trigger selection for one capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub kind: TriggerKind,
    pub channel: u8,
    pub inverted: bool,
    /// Bit pattern ("1011"-style) for [`TriggerKind::Pattern`].
    pub pattern: Option<String>,
}

impl TriggerConfig {
    pub fn edge(channel: u8) -> Self {
        Self {
            kind: TriggerKind::Edge,
            channel,
            inverted: false,
            pattern: None,
        }
    }
}

/// One capture channel and, after a successful capture, its sample buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureChannel {
    pub index: u8,
    pub label: String,
    /// Ordered binary samples; length equals the planned total sample count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<u8>>,
}

impl CaptureChannel {
    pub fn new(index: u8, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            samples: None,
        }
    }
}

/// Caller-supplied plan for one acquisition.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub sample_rate_hz: u32,
    pub pre_trigger_samples: u32,
    pub post_trigger_samples: u32,
    pub trigger: TriggerConfig,
    pub channels: Vec<CaptureChannel>,
    pub burst_count: u8,
}

impl CaptureSession {
    pub fn total_samples(&self) -> u64 {
        u64::from(self.pre_trigger_samples) + u64::from(self.post_trigger_samples)
    }
}

/// Terminal result of one capture attempt.
#[derive(Debug)]
pub struct CaptureOutcome {
    /// The plan this outcome refers to, with sample buffers attached on
    /// success.
    pub session: CaptureSession,
    pub error: Option<LaError>,
}

impl CaptureOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Capture lifecycle state, observable through the session status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Validating,
    Configuring,
    Started,
    Polling,
    Reading,
    Completed,
    Failed,
}

/// Validate a capture plan against the device descriptor.
///
/// Pure: no command is issued for a rejected plan. Boundary policy is strict
/// `>` — a rate equal to the device maximum and a sample count equal to the
/// buffer size are both accepted.
pub fn validate(session: &CaptureSession, descriptor: &DeviceDescriptor) -> LaResult<()> {
    if session.sample_rate_hz > descriptor.max_sample_rate_hz {
        return Err(LaError::BadParams(format!(
            "Sample rate {} Hz exceeds device maximum {} Hz",
            session.sample_rate_hz, descriptor.max_sample_rate_hz
        )));
    }
    if session.sample_rate_hz < descriptor.min_sample_rate_hz {
        return Err(LaError::BadParams(format!(
            "Sample rate {} Hz is below device minimum {} Hz",
            session.sample_rate_hz, descriptor.min_sample_rate_hz
        )));
    }
    if session.channels.is_empty() {
        return Err(LaError::BadParams("No channels selected".to_string()));
    }

    let mut seen = [false; 256];
    for channel in &session.channels {
        if channel.index >= descriptor.channel_count {
            return Err(LaError::BadParams(format!(
                "Channel {} outside device range 0..{}",
                channel.index, descriptor.channel_count
            )));
        }
        if seen[usize::from(channel.index)] {
            return Err(LaError::BadParams(format!(
                "Channel {} selected twice",
                channel.index
            )));
        }
        seen[usize::from(channel.index)] = true;
    }

    if session.total_samples() > u64::from(descriptor.buffer_size) {
        return Err(LaError::BadParams(format!(
            "{} samples exceed device buffer of {}",
            session.total_samples(),
            descriptor.buffer_size
        )));
    }

    Ok(())
}

/// Drive one accepted capture to its single terminal outcome.
///
/// Runs as a spawned task; the worker holds the cancel sender and the state
/// receiver. Cancellation (stop request) wins over in-flight work, and the
/// returned outcome is the only one ever produced for this capture.
pub(crate) async fn run_capture(
    mut session: CaptureSession,
    handle: CommandHandle,
    commands: Arc<dyn CommandSet>,
    timeouts: TimeoutSettings,
    mut cancel: watch::Receiver<bool>,
    state: watch::Sender<CaptureState>,
) -> CaptureOutcome {
    let result = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => Err(LaError::Stopped),
        r = drive(&mut session, &handle, commands.as_ref(), &timeouts, &state) => r,
    };

    match &result {
        Ok(()) => {
            info!(
                "Capture complete: {} channels x {} samples",
                session.channels.len(),
                session.total_samples()
            );
            let _ = state.send(CaptureState::Completed);
        }
        Err(e) => {
            info!("Capture failed: {e}");
            let _ = state.send(CaptureState::Failed);
        }
    }

    CaptureOutcome {
        session,
        error: result.err(),
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Worker gone; the command path will fail on its own.
            futures::future::pending::<()>().await;
        }
    }
}

async fn drive(
    session: &mut CaptureSession,
    handle: &CommandHandle,
    commands: &dyn CommandSet,
    timeouts: &TimeoutSettings,
    state: &watch::Sender<CaptureState>,
) -> LaResult<()> {
    let _ = state.send(CaptureState::Configuring);
    let indices: Vec<u8> = session.channels.iter().map(|c| c.index).collect();
    let configure = [
        commands.set_sample_rate(session.sample_rate_hz),
        commands.set_channels(&indices),
        commands.set_trigger(&session.trigger),
        commands.set_sample_counts(
            session.pre_trigger_samples,
            session.post_trigger_samples,
            session.burst_count,
        ),
    ];
    for body in configure {
        let frame = handle
            .command(body, timeouts.command)
            .await
            .map_err(|e| LaError::Unexpected(format!("Configuration command failed: {e}")))?;
        commands
            .parse_ack(&frame)
            .map_err(|e| LaError::Unexpected(format!("Configuration rejected: {e}")))?;
    }

    let _ = state.send(CaptureState::Started);
    let frame = handle
        .command(commands.start(), timeouts.command)
        .await
        .map_err(|e| LaError::Unexpected(format!("Start command failed: {e}")))?;
    commands
        .parse_ack(&frame)
        .map_err(|e| LaError::Unexpected(format!("Start rejected: {e}")))?;

    // The capture deadline is independent of the per-command timeout.
    let deadline = Instant::now() + timeouts.capture;
    let _ = state.send(CaptureState::Polling);
    match tokio::time::timeout_at(deadline, poll_until_complete(handle, commands, timeouts)).await
    {
        Err(_) => return Err(LaError::CaptureTimeout),
        Ok(result) => result?,
    }

    let _ = state.send(CaptureState::Reading);
    let total = session.total_samples() as usize;
    for channel in &mut session.channels {
        let frame = handle
            .command(commands.read_samples(channel.index), timeouts.command)
            .await?;
        channel.samples = Some(commands.parse_samples(&frame, total)?);
        debug!("Read {total} samples from channel {}", channel.index);
    }

    Ok(())
}

async fn poll_until_complete(
    handle: &CommandHandle,
    commands: &dyn CommandSet,
    timeouts: &TimeoutSettings,
) -> LaResult<()> {
    let mut ticker = tokio::time::interval(timeouts.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let frame = handle.command(commands.status(), timeouts.command).await?;
        match commands.parse_status(&frame)? {
            CaptureProgress::Running => continue,
            CaptureProgress::Complete => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TransportKind;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::fallback(TransportKind::Serial)
    }

    fn plan(rate: u32, pre: u32, post: u32, indices: &[u8]) -> CaptureSession {
        CaptureSession {
            sample_rate_hz: rate,
            pre_trigger_samples: pre,
            post_trigger_samples: post,
            trigger: TriggerConfig::edge(indices.first().copied().unwrap_or(0)),
            channels: indices
                .iter()
                .map(|&i| CaptureChannel::new(i, format!("CH{i}")))
                .collect(),
            burst_count: 1,
        }
    }

    #[test]
    fn test_rate_at_maximum_accepted() {
        let d = descriptor();
        assert!(validate(&plan(d.max_sample_rate_hz, 0, 1024, &[0, 1]), &d).is_ok());
    }

    #[test]
    fn test_rate_above_maximum_rejected() {
        let d = descriptor();
        let err = validate(&plan(d.max_sample_rate_hz + 1, 0, 1024, &[0, 1]), &d).unwrap_err();
        assert!(matches!(err, LaError::BadParams(_)));
    }

    #[test]
    fn test_rate_below_minimum_rejected() {
        let d = descriptor();
        let err = validate(&plan(d.min_sample_rate_hz - 1, 0, 1024, &[0]), &d).unwrap_err();
        assert!(matches!(err, LaError::BadParams(_)));
    }

    #[test]
    fn test_buffer_boundary() {
        let d = descriptor();
        // pre + post == buffer_size is valid; one more is not.
        assert!(validate(&plan(1_000_000, 1, d.buffer_size - 1, &[0]), &d).is_ok());
        assert!(validate(&plan(1_000_000, 2, d.buffer_size - 1, &[0]), &d).is_err());
    }

    #[test]
    fn test_zero_pre_trigger_valid() {
        let d = descriptor();
        assert!(validate(&plan(1_000_000, 0, 16, &[0]), &d).is_ok());
    }

    #[test]
    fn test_empty_channel_set_rejected() {
        let d = descriptor();
        assert!(validate(&plan(1_000_000, 0, 16, &[]), &d).is_err());
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let d = descriptor();
        assert!(validate(&plan(1_000_000, 0, 16, &[0, 3, 3]), &d).is_err());
    }

    #[test]
    fn test_channel_out_of_range_rejected() {
        let d = descriptor();
        assert!(validate(&plan(1_000_000, 0, 16, &[d.channel_count]), &d).is_err());
    }

    #[test]
    fn test_total_samples() {
        let p = plan(1_000_000, 100, 900, &[0]);
        assert_eq!(p.total_samples(), 1000);
    }
}
