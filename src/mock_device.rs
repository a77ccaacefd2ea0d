//! Scripted mock analyzer.
//!
//! [`MockAnalyzer`] drives the device end of a [`mock transport
//! pair`](crate::transport::mock::pair), speaking any of the three protocol
//! families through the real codecs. It answers identification and capability
//! queries, acknowledges configuration, sequences capture progress over a
//! configurable number of status polls, and serves randomly generated sample
//! data — enough to run the whole engine end-to-end without hardware.
//! [`MockBehavior`] injects the failure paths the state machine must survive.

use crate::config::ProtocolFamily;
use crate::framing::{make_codec, CommandBody, Frame, FrameBody};
use crate::profile::{encode_hex, opcode};
use crate::transport::mock::MockRemote;
use bytes::Bytes;
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// Failure injection for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MockBehavior {
    #[default]
    Normal,
    /// Reject the first configuration command with this message.
    FailConfigure(String),
    /// Report a device error from every status poll.
    FailStatus(String),
    /// Report "running" forever, to exercise the capture timeout.
    NeverComplete,
    /// Never answer status polls, to exercise the command timeout.
    DropStatusReplies,
    /// Drop the connection on the first status poll, to exercise transport
    /// loss during an active capture.
    HangUpOnStatus,
}

#[derive(Debug, Clone)]
pub struct MockAnalyzerConfig {
    pub family: ProtocolFamily,
    pub name: String,
    pub firmware: String,
    pub channel_count: u8,
    pub max_sample_rate_hz: u32,
    pub buffer_size: u32,
    /// Status polls answered "running" before the capture completes.
    pub polls_until_complete: u32,
    pub behavior: MockBehavior,
}

impl Default for MockAnalyzerConfig {
    fn default() -> Self {
        Self {
            family: ProtocolFamily::Text,
            name: "MOCKLA".to_string(),
            firmware: "1.0.0".to_string(),
            channel_count: 8,
            max_sample_rate_hz: 24_000_000,
            buffer_size: 131_072,
            polls_until_complete: 2,
            behavior: MockBehavior::Normal,
        }
    }
}

pub struct MockAnalyzer;

impl MockAnalyzer {
    /// Spawn the device task on the remote end of a mock transport pair.
    pub fn spawn(config: MockAnalyzerConfig, remote: MockRemote) -> JoinHandle<()> {
        tokio::spawn(run(config, remote))
    }
}

enum Request {
    Identify,
    ChannelCount,
    MaxRate,
    BufferSize,
    Configure,
    SetSamples { pre: u32, post: u32 },
    Start,
    Stop,
    Status,
    Read,
    Unknown,
}

struct DeviceState {
    polls_left: u32,
    total_samples: u64,
}

async fn run(config: MockAnalyzerConfig, mut remote: MockRemote) {
    let mut codec = make_codec(config.family);
    let mut state = DeviceState {
        polls_left: config.polls_until_complete,
        total_samples: 0,
    };

    while let Some(chunk) = remote.recv().await {
        codec.push(&chunk);
        while let Some(decoded) = codec.next_frame() {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Mock analyzer ignoring damaged frame: {e}");
                    continue;
                }
            };

            if config.behavior == MockBehavior::HangUpOnStatus
                && matches!(parse_request(&frame), Request::Status)
            {
                remote.hang_up("mock device vanished").await;
                return;
            }

            let Some(reply) = handle_frame(&config, &mut state, &frame) else {
                debug!("Mock analyzer withholding reply");
                continue;
            };
            match codec.encode(&reply, frame.id) {
                Ok(wire) => remote.reply(wire).await,
                Err(e) => warn!("Mock analyzer failed to encode reply: {e}"),
            }
        }
    }
}

fn handle_frame(
    config: &MockAnalyzerConfig,
    state: &mut DeviceState,
    frame: &Frame,
) -> Option<CommandBody> {
    let family = config.family;
    let reply_op = match &frame.body {
        FrameBody::Binary { opcode: op, .. } => op | opcode::REPLY,
        _ => 0,
    };

    match parse_request(frame) {
        Request::Identify => Some(identify_reply(config, reply_op)),
        Request::ChannelCount => Some(number_reply(
            family,
            reply_op,
            u64::from(config.channel_count),
        )),
        Request::MaxRate => Some(number_reply(
            family,
            reply_op,
            u64::from(config.max_sample_rate_hz),
        )),
        Request::BufferSize => Some(number_reply(family, reply_op, u64::from(config.buffer_size))),
        Request::SetSamples { pre, post } => {
            state.total_samples = u64::from(pre) + u64::from(post);
            Some(configure_ack(config, reply_op))
        }
        Request::Configure => Some(configure_ack(config, reply_op)),
        Request::Start => {
            state.polls_left = config.polls_until_complete;
            Some(ok_ack(family, reply_op))
        }
        Request::Stop => Some(ok_ack(family, reply_op)),
        Request::Status => match &config.behavior {
            MockBehavior::DropStatusReplies => None,
            MockBehavior::FailStatus(message) => Some(status_error(family, reply_op, message)),
            MockBehavior::NeverComplete => Some(status_running(family, reply_op)),
            _ => {
                if state.polls_left > 0 {
                    state.polls_left -= 1;
                    Some(status_running(family, reply_op))
                } else {
                    Some(status_complete(family, reply_op))
                }
            }
        },
        Request::Read => {
            let samples: Vec<u8> = (0..state.total_samples)
                .map(|_| u8::from(rand::random::<bool>()))
                .collect();
            Some(samples_reply(family, reply_op, &samples))
        }
        Request::Unknown => Some(error_ack(family, reply_op, "unknown command")),
    }
}

fn parse_request(frame: &Frame) -> Request {
    match &frame.body {
        FrameBody::Text(line) => parse_text_request(line),
        FrameBody::Json(value) => parse_json_request(value),
        FrameBody::Binary { opcode: op, payload } => parse_binary_request(*op, payload),
    }
}

fn parse_text_request(line: &str) -> Request {
    if let Some(args) = line.strip_prefix("CONF:SAMP ") {
        let mut parts = args.split(',');
        let pre = parts.next().and_then(|v| v.parse().ok());
        let post = parts.next().and_then(|v| v.parse().ok());
        return match (pre, post) {
            (Some(pre), Some(post)) => Request::SetSamples { pre, post },
            _ => Request::Unknown,
        };
    }

    match line {
        "*IDN?" => Request::Identify,
        "CHAN:COUNT?" => Request::ChannelCount,
        "RATE:MAX?" => Request::MaxRate,
        "BUF:SIZE?" => Request::BufferSize,
        "RUN" => Request::Start,
        "STOP" => Request::Stop,
        "STAT?" => Request::Status,
        _ if line.starts_with("CONF:") => Request::Configure,
        _ if line.starts_with("DATA?") => Request::Read,
        _ => Request::Unknown,
    }
}

fn parse_json_request(value: &Value) -> Request {
    match value.get("command").and_then(Value::as_str) {
        Some("identify") => Request::Identify,
        Some("capability") => match value.get("item").and_then(Value::as_str) {
            Some("channels") => Request::ChannelCount,
            Some("max_rate") => Request::MaxRate,
            Some("buffer") => Request::BufferSize,
            _ => Request::Unknown,
        },
        Some("set_samples") => {
            let pre = value.get("pre").and_then(Value::as_u64);
            let post = value.get("post").and_then(Value::as_u64);
            match (pre, post) {
                (Some(pre), Some(post)) => Request::SetSamples {
                    pre: pre as u32,
                    post: post as u32,
                },
                _ => Request::Unknown,
            }
        }
        Some("set_rate") | Some("set_channels") | Some("set_trigger") => Request::Configure,
        Some("start") => Request::Start,
        Some("stop") => Request::Stop,
        Some("status") => Request::Status,
        Some("read") => Request::Read,
        _ => Request::Unknown,
    }
}

fn parse_binary_request(op: u16, payload: &Bytes) -> Request {
    match op {
        opcode::IDENTIFY => Request::Identify,
        opcode::CHANNEL_COUNT => Request::ChannelCount,
        opcode::MAX_RATE => Request::MaxRate,
        opcode::BUFFER_SIZE => Request::BufferSize,
        opcode::SET_SAMPLES => {
            if payload.len() < 8 {
                return Request::Unknown;
            }
            let pre = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let post = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
            Request::SetSamples { pre, post }
        }
        opcode::SET_RATE | opcode::SET_CHANNELS | opcode::SET_TRIGGER => Request::Configure,
        opcode::START => Request::Start,
        opcode::STOP => Request::Stop,
        opcode::STATUS => Request::Status,
        opcode::READ => Request::Read,
        _ => Request::Unknown,
    }
}

fn configure_ack(config: &MockAnalyzerConfig, reply_op: u16) -> CommandBody {
    match &config.behavior {
        MockBehavior::FailConfigure(message) => error_ack(config.family, reply_op, message),
        _ => ok_ack(config.family, reply_op),
    }
}

fn identify_reply(config: &MockAnalyzerConfig, reply_op: u16) -> CommandBody {
    match config.family {
        ProtocolFamily::Text => CommandBody::Text(format!("{},{}", config.name, config.firmware)),
        ProtocolFamily::Json => CommandBody::Json(json!({
            "success": true,
            "data": {"name": config.name, "firmware": config.firmware},
        })),
        ProtocolFamily::Binary => {
            let mut payload = vec![config.name.len() as u8];
            payload.extend_from_slice(config.name.as_bytes());
            payload.push(config.firmware.len() as u8);
            payload.extend_from_slice(config.firmware.as_bytes());
            CommandBody::Binary {
                opcode: reply_op,
                payload: Bytes::from(payload),
            }
        }
    }
}

fn number_reply(family: ProtocolFamily, reply_op: u16, value: u64) -> CommandBody {
    match family {
        ProtocolFamily::Text => CommandBody::Text(value.to_string()),
        ProtocolFamily::Json => CommandBody::Json(json!({"success": true, "data": value})),
        ProtocolFamily::Binary => CommandBody::Binary {
            opcode: reply_op,
            payload: Bytes::copy_from_slice(&(value as u32).to_le_bytes()),
        },
    }
}

fn ok_ack(family: ProtocolFamily, reply_op: u16) -> CommandBody {
    match family {
        ProtocolFamily::Text => CommandBody::Text("OK".to_string()),
        ProtocolFamily::Json => CommandBody::Json(json!({"success": true})),
        ProtocolFamily::Binary => CommandBody::Binary {
            opcode: reply_op,
            payload: Bytes::from_static(&[0]),
        },
    }
}

fn error_ack(family: ProtocolFamily, reply_op: u16, message: &str) -> CommandBody {
    match family {
        ProtocolFamily::Text => CommandBody::Text(format!("ERR:{message}")),
        ProtocolFamily::Json => {
            CommandBody::Json(json!({"success": false, "error": message}))
        }
        ProtocolFamily::Binary => {
            let mut payload = vec![1u8];
            payload.extend_from_slice(message.as_bytes());
            CommandBody::Binary {
                opcode: reply_op,
                payload: Bytes::from(payload),
            }
        }
    }
}

fn status_running(family: ProtocolFamily, reply_op: u16) -> CommandBody {
    match family {
        ProtocolFamily::Text => CommandBody::Text("RUN".to_string()),
        ProtocolFamily::Json => CommandBody::Json(json!({"success": true, "data": "running"})),
        ProtocolFamily::Binary => CommandBody::Binary {
            opcode: reply_op,
            payload: Bytes::from_static(&[0]),
        },
    }
}

fn status_complete(family: ProtocolFamily, reply_op: u16) -> CommandBody {
    match family {
        ProtocolFamily::Text => CommandBody::Text("DONE".to_string()),
        ProtocolFamily::Json => CommandBody::Json(json!({"success": true, "data": "complete"})),
        ProtocolFamily::Binary => CommandBody::Binary {
            opcode: reply_op,
            payload: Bytes::from_static(&[1]),
        },
    }
}

fn status_error(family: ProtocolFamily, reply_op: u16, message: &str) -> CommandBody {
    match family {
        ProtocolFamily::Text => CommandBody::Text(format!("ERR:{message}")),
        ProtocolFamily::Json => {
            CommandBody::Json(json!({"success": false, "error": message}))
        }
        ProtocolFamily::Binary => {
            let mut payload = vec![2u8];
            payload.extend_from_slice(message.as_bytes());
            CommandBody::Binary {
                opcode: reply_op,
                payload: Bytes::from(payload),
            }
        }
    }
}

fn samples_reply(family: ProtocolFamily, reply_op: u16, samples: &[u8]) -> CommandBody {
    match family {
        ProtocolFamily::Text => CommandBody::Text(encode_hex(samples)),
        ProtocolFamily::Json => {
            CommandBody::Json(json!({"success": true, "data": encode_hex(samples)}))
        }
        ProtocolFamily::Binary => CommandBody::Binary {
            opcode: reply_op,
            payload: Bytes::copy_from_slice(samples),
        },
    }
}
