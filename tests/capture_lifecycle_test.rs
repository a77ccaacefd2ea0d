//! End-to-end capture lifecycle tests against the scripted mock analyzer.
//!
//! Every termination path — success, device error, capture timeout, command
//! timeout, stop, transport loss — must deliver exactly one outcome and leave
//! the session idle.

use rust_la::capture::{CaptureChannel, CaptureSession, CaptureState, TriggerConfig};
use rust_la::config::{ProtocolFamily, TimeoutSettings};
use rust_la::error::LaError;
use rust_la::mock_device::{MockAnalyzer, MockAnalyzerConfig, MockBehavior};
use rust_la::session::DeviceSession;
use rust_la::transport::mock::pair;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_timeouts() -> TimeoutSettings {
    TimeoutSettings {
        connect: Duration::from_secs(1),
        command: Duration::from_millis(500),
        capture: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
    }
}

async fn connect_mock(
    config: MockAnalyzerConfig,
    timeouts: TimeoutSettings,
) -> (DeviceSession, Arc<AtomicUsize>) {
    let family = config.family;
    let (transport, remote) = pair();
    let counter = transport.sent_counter();
    MockAnalyzer::spawn(config, remote);
    let session = DeviceSession::connect_with_transport(Box::new(transport), family, timeouts)
        .await
        .unwrap();
    (session, counter)
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

#[tokio::test]
async fn test_successful_capture_fills_all_channels() {
    let (session, _) = connect_mock(MockAnalyzerConfig::default(), fast_timeouts()).await;

    let handle = session
        .start_capture(plan(1_000_000, 16, 240, &[0, 1, 2]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();

    assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    for channel in &outcome.session.channels {
        let samples = channel.samples.as_ref().unwrap();
        assert_eq!(samples.len(), 256);
        assert!(samples.iter().all(|&s| s <= 1));
    }

    let status = session.status().await.unwrap();
    assert_eq!(status.capture_state, CaptureState::Idle);
    session.disconnect().await;
}

#[tokio::test]
async fn test_capture_accepted_at_max_rate() {
    let (session, _) = connect_mock(MockAnalyzerConfig::default(), fast_timeouts()).await;

    let max = session.descriptor().max_sample_rate_hz;
    let handle = session.start_capture(plan(max, 0, 64, &[0])).await.unwrap();
    assert!(handle.await.unwrap().success());
    session.disconnect().await;
}

#[tokio::test]
async fn test_bad_params_rejected_without_touching_device() {
    let (session, sent) = connect_mock(MockAnalyzerConfig::default(), fast_timeouts()).await;

    let baseline = sent.load(Ordering::SeqCst);
    let max = session.descriptor().max_sample_rate_hz;

    let rejections = [
        plan(max + 1, 0, 64, &[0]),
        plan(1_000_000, 0, 64, &[]),
        plan(1_000_000, 0, 64, &[1, 1]),
        plan(1_000_000, 0, 64, &[200]),
        plan(1_000_000, 1, session.descriptor().buffer_size, &[0]),
    ];
    for bad in rejections {
        match session.start_capture(bad).await {
            Err(LaError::BadParams(_)) => {}
            other => panic!("expected BadParams, got {other:?}"),
        }
    }

    // No command reached the transport for any rejection.
    assert_eq!(sent.load(Ordering::SeqCst), baseline);
    session.disconnect().await;
}

#[tokio::test]
async fn test_busy_rejection_leaves_capture_running() {
    let config = MockAnalyzerConfig {
        polls_until_complete: 30,
        ..MockAnalyzerConfig::default()
    };
    let (session, _) = connect_mock(config, fast_timeouts()).await;

    let handle = session
        .start_capture(plan(1_000_000, 0, 64, &[0]))
        .await
        .unwrap();

    match session.start_capture(plan(1_000_000, 0, 64, &[1])).await {
        Err(LaError::Busy) => {}
        other => panic!("expected Busy, got {other:?}"),
    }

    // The in-flight capture still completes normally.
    let outcome = handle.await.unwrap();
    assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    session.disconnect().await;
}

#[tokio::test]
async fn test_device_error_fails_capture() {
    let config = MockAnalyzerConfig {
        behavior: MockBehavior::FailStatus("trigger overrun".to_string()),
        ..MockAnalyzerConfig::default()
    };
    let (session, _) = connect_mock(config, fast_timeouts()).await;

    let handle = session
        .start_capture(plan(1_000_000, 0, 64, &[0]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();

    assert_eq!(
        outcome.error,
        Some(LaError::DeviceError("trigger overrun".to_string()))
    );
    assert_eq!(
        session.status().await.unwrap().capture_state,
        CaptureState::Idle
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_configure_rejection_is_unexpected_error() {
    let config = MockAnalyzerConfig {
        behavior: MockBehavior::FailConfigure("rate unsupported".to_string()),
        ..MockAnalyzerConfig::default()
    };
    let (session, _) = connect_mock(config, fast_timeouts()).await;

    let handle = session
        .start_capture(plan(1_000_000, 0, 64, &[0]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();

    match outcome.error {
        Some(LaError::Unexpected(msg)) => assert!(msg.contains("rate unsupported")),
        other => panic!("expected Unexpected, got {other:?}"),
    }
    session.disconnect().await;
}

#[tokio::test]
async fn test_capture_timeout_when_device_never_completes() {
    let config = MockAnalyzerConfig {
        behavior: MockBehavior::NeverComplete,
        ..MockAnalyzerConfig::default()
    };
    let timeouts = TimeoutSettings {
        capture: Duration::from_millis(200),
        ..fast_timeouts()
    };
    let (session, _) = connect_mock(config, timeouts).await;

    let handle = session
        .start_capture(plan(1_000_000, 0, 64, &[0]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();

    assert_eq!(outcome.error, Some(LaError::CaptureTimeout));
    session.disconnect().await;
}

#[tokio::test]
async fn test_silent_device_times_out_per_command() {
    let config = MockAnalyzerConfig {
        behavior: MockBehavior::DropStatusReplies,
        ..MockAnalyzerConfig::default()
    };
    let timeouts = TimeoutSettings {
        command: Duration::from_millis(100),
        ..fast_timeouts()
    };
    let (session, _) = connect_mock(config, timeouts).await;

    let handle = session
        .start_capture(plan(1_000_000, 0, 64, &[0]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();

    assert_eq!(outcome.error, Some(LaError::CommandTimeout));
    session.disconnect().await;
}

#[tokio::test]
async fn test_stop_capture_delivers_single_stopped_outcome() {
    let config = MockAnalyzerConfig {
        polls_until_complete: 1_000,
        ..MockAnalyzerConfig::default()
    };
    let (session, _) = connect_mock(config, fast_timeouts()).await;

    // Nothing active yet.
    assert!(!session.stop_capture().await);

    let handle = session
        .start_capture(plan(1_000_000, 0, 64, &[0]))
        .await
        .unwrap();
    assert!(session.stop_capture().await);

    let outcome = handle.await.unwrap();
    assert_eq!(outcome.error, Some(LaError::Stopped));

    assert_eq!(
        session.status().await.unwrap().capture_state,
        CaptureState::Idle
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_during_capture_fails_with_connection_lost() {
    let config = MockAnalyzerConfig {
        behavior: MockBehavior::HangUpOnStatus,
        ..MockAnalyzerConfig::default()
    };
    let (session, _) = connect_mock(config, fast_timeouts()).await;

    let handle = session
        .start_capture(plan(1_000_000, 0, 64, &[0]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();

    match outcome.error {
        Some(LaError::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
}

#[tokio::test]
async fn test_back_to_back_captures_after_outcome() {
    let (session, _) = connect_mock(MockAnalyzerConfig::default(), fast_timeouts()).await;

    for _ in 0..3 {
        let handle = session
            .start_capture(plan(1_000_000, 0, 32, &[0, 1]))
            .await
            .unwrap();
        let outcome = handle.await.unwrap();
        assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    }
    session.disconnect().await;
}

#[tokio::test]
async fn test_json_family_capture() {
    let config = MockAnalyzerConfig {
        family: ProtocolFamily::Json,
        ..MockAnalyzerConfig::default()
    };
    let (session, _) = connect_mock(config, fast_timeouts()).await;

    assert_eq!(session.descriptor().name, "MOCKLA");
    let handle = session
        .start_capture(plan(1_000_000, 8, 56, &[0, 3]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();
    assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    assert_eq!(
        outcome.session.channels[1].samples.as_ref().unwrap().len(),
        64
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_binary_family_capture() {
    let config = MockAnalyzerConfig {
        family: ProtocolFamily::Binary,
        ..MockAnalyzerConfig::default()
    };
    let (session, _) = connect_mock(config, fast_timeouts()).await;

    assert_eq!(session.descriptor().channel_count, 8);
    let handle = session
        .start_capture(plan(1_000_000, 0, 128, &[0]))
        .await
        .unwrap();
    let outcome = handle.await.unwrap();
    assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    assert_eq!(
        outcome.session.channels[0].samples.as_ref().unwrap().len(),
        128
    );
    session.disconnect().await;
}
