//! Device command profiles.
//!
//! A [`CommandSet`] holds the command templates and response parsing for one
//! protocol family. Device-specific behavior is injected as configuration —
//! a driver is the composition of a transport, a codec, and a command set,
//! not a subclass hierarchy. All three families expose the same operations:
//! identification/capability queries, capture configuration, start/stop,
//! status polling, and sample readout.

use crate::capture::TriggerConfig;
use crate::descriptor::TriggerKind;
use crate::error::{LaError, LaResult};
use crate::framing::{CommandBody, Frame, FrameBody};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};
use std::sync::Arc;

/// Read-only device queries issued during capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceQuery {
    Identify,
    ChannelCount,
    MaxSampleRate,
    BufferSize,
}

/// Device-reported capture progress from a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProgress {
    Running,
    Complete,
}

/// Command templates and response parsing for one protocol family.
pub trait CommandSet: Send + Sync {
    fn query(&self, query: DeviceQuery) -> CommandBody;
    fn set_sample_rate(&self, hz: u32) -> CommandBody;
    fn set_channels(&self, indices: &[u8]) -> CommandBody;
    fn set_trigger(&self, trigger: &TriggerConfig) -> CommandBody;
    fn set_sample_counts(&self, pre: u32, post: u32, burst: u8) -> CommandBody;
    fn start(&self) -> CommandBody;
    fn stop(&self) -> CommandBody;
    fn status(&self) -> CommandBody;
    fn read_samples(&self, channel: u8) -> CommandBody;

    /// Extract (name, firmware) from an identification reply.
    fn parse_identify(&self, frame: &Frame) -> Option<(String, String)>;
    /// Extract a numeric capability value.
    fn parse_number(&self, frame: &Frame) -> Option<u64>;
    /// Check a configure/start/stop acknowledgement for a device error.
    fn parse_ack(&self, frame: &Frame) -> LaResult<()>;
    /// Interpret a status reply. Device-reported failures surface as
    /// `Err(DeviceError)`.
    fn parse_status(&self, frame: &Frame) -> LaResult<CaptureProgress>;
    /// Decode one channel's sample buffer, checking the expected length.
    fn parse_samples(&self, frame: &Frame, expected: usize) -> LaResult<Vec<u8>>;
}

/// Build the command set for a protocol family.
pub fn command_set(family: crate::config::ProtocolFamily) -> Arc<dyn CommandSet> {
    match family {
        crate::config::ProtocolFamily::Text => Arc::new(TextCommands),
        crate::config::ProtocolFamily::Json => Arc::new(JsonCommands),
        crate::config::ProtocolFamily::Binary => Arc::new(BinaryCommands),
    }
}

pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

pub(crate) fn decode_hex(text: &str) -> LaResult<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return Err(LaError::Decode("Odd-length hex sample data".to_string()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| LaError::Decode(format!("Invalid hex at offset {i}")))
        })
        .collect()
}

fn expect_len(samples: Vec<u8>, expected: usize) -> LaResult<Vec<u8>> {
    if samples.len() != expected {
        return Err(LaError::Decode(format!(
            "Sample payload holds {} samples, expected {expected}",
            samples.len()
        )));
    }
    Ok(samples)
}

// =============================================================================
// Text protocol (SCPI-flavored, FIFO matching)
// =============================================================================

struct TextCommands;

fn trigger_kind_text(kind: TriggerKind) -> &'static str {
    match kind {
        TriggerKind::Edge => "EDGE",
        TriggerKind::Level => "LEVEL",
        TriggerKind::Pattern => "PAT",
    }
}

impl TextCommands {
    fn text_of<'a>(&self, frame: &'a Frame) -> Option<&'a str> {
        match &frame.body {
            FrameBody::Text(line) => Some(line.as_str()),
            _ => None,
        }
    }
}

impl CommandSet for TextCommands {
    fn query(&self, query: DeviceQuery) -> CommandBody {
        let line = match query {
            DeviceQuery::Identify => "*IDN?",
            DeviceQuery::ChannelCount => "CHAN:COUNT?",
            DeviceQuery::MaxSampleRate => "RATE:MAX?",
            DeviceQuery::BufferSize => "BUF:SIZE?",
        };
        CommandBody::Text(line.to_string())
    }

    fn set_sample_rate(&self, hz: u32) -> CommandBody {
        CommandBody::Text(format!("CONF:RATE {hz}"))
    }

    fn set_channels(&self, indices: &[u8]) -> CommandBody {
        let list = indices
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",");
        CommandBody::Text(format!("CONF:CHAN {list}"))
    }

    fn set_trigger(&self, trigger: &TriggerConfig) -> CommandBody {
        let polarity = if trigger.inverted { "NEG" } else { "POS" };
        let mut line = format!(
            "CONF:TRIG {},{},{}",
            trigger_kind_text(trigger.kind),
            trigger.channel,
            polarity
        );
        if let Some(pattern) = &trigger.pattern {
            line.push(',');
            line.push_str(pattern);
        }
        CommandBody::Text(line)
    }

    fn set_sample_counts(&self, pre: u32, post: u32, burst: u8) -> CommandBody {
        CommandBody::Text(format!("CONF:SAMP {pre},{post},{burst}"))
    }

    fn start(&self) -> CommandBody {
        CommandBody::Text("RUN".to_string())
    }

    fn stop(&self) -> CommandBody {
        CommandBody::Text("STOP".to_string())
    }

    fn status(&self) -> CommandBody {
        CommandBody::Text("STAT?".to_string())
    }

    fn read_samples(&self, channel: u8) -> CommandBody {
        CommandBody::Text(format!("DATA? {channel}"))
    }

    fn parse_identify(&self, frame: &Frame) -> Option<(String, String)> {
        let line = self.text_of(frame)?;
        let (name, firmware) = line.split_once(',')?;
        Some((name.trim().to_string(), firmware.trim().to_string()))
    }

    fn parse_number(&self, frame: &Frame) -> Option<u64> {
        self.text_of(frame)?.trim().parse().ok()
    }

    fn parse_ack(&self, frame: &Frame) -> LaResult<()> {
        let line = self
            .text_of(frame)
            .ok_or_else(|| LaError::Decode("Expected a text reply".to_string()))?;
        if let Some(message) = line.strip_prefix("ERR:") {
            return Err(LaError::DeviceError(message.trim().to_string()));
        }
        Ok(())
    }

    fn parse_status(&self, frame: &Frame) -> LaResult<CaptureProgress> {
        let line = self
            .text_of(frame)
            .ok_or_else(|| LaError::Decode("Expected a text reply".to_string()))?;
        match line {
            "RUN" => Ok(CaptureProgress::Running),
            "DONE" => Ok(CaptureProgress::Complete),
            other => match other.strip_prefix("ERR:") {
                Some(message) => Err(LaError::DeviceError(message.trim().to_string())),
                None => Err(LaError::Decode(format!("Unexpected status reply '{other}'"))),
            },
        }
    }

    fn parse_samples(&self, frame: &Frame, expected: usize) -> LaResult<Vec<u8>> {
        let line = self
            .text_of(frame)
            .ok_or_else(|| LaError::Decode("Expected a text reply".to_string()))?;
        if let Some(message) = line.strip_prefix("ERR:") {
            return Err(LaError::DeviceError(message.trim().to_string()));
        }
        expect_len(decode_hex(line)?, expected)
    }
}

// =============================================================================
// JSON protocol (id-correlated)
// =============================================================================

struct JsonCommands;

impl JsonCommands {
    fn object_of<'a>(&self, frame: &'a Frame) -> Option<&'a Value> {
        match &frame.body {
            FrameBody::Json(value) => Some(value),
            _ => None,
        }
    }

    fn check_success<'a>(&self, frame: &'a Frame) -> LaResult<&'a Value> {
        let value = self
            .object_of(frame)
            .ok_or_else(|| LaError::Decode("Expected a JSON reply".to_string()))?;
        if value.get("success").and_then(Value::as_bool) == Some(true) {
            Ok(value)
        } else {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unspecified device error");
            Err(LaError::DeviceError(message.to_string()))
        }
    }
}

impl CommandSet for JsonCommands {
    fn query(&self, query: DeviceQuery) -> CommandBody {
        let value = match query {
            DeviceQuery::Identify => json!({"command": "identify"}),
            DeviceQuery::ChannelCount => json!({"command": "capability", "item": "channels"}),
            DeviceQuery::MaxSampleRate => json!({"command": "capability", "item": "max_rate"}),
            DeviceQuery::BufferSize => json!({"command": "capability", "item": "buffer"}),
        };
        CommandBody::Json(value)
    }

    fn set_sample_rate(&self, hz: u32) -> CommandBody {
        CommandBody::Json(json!({"command": "set_rate", "hz": hz}))
    }

    fn set_channels(&self, indices: &[u8]) -> CommandBody {
        CommandBody::Json(json!({"command": "set_channels", "channels": indices}))
    }

    fn set_trigger(&self, trigger: &TriggerConfig) -> CommandBody {
        CommandBody::Json(json!({
            "command": "set_trigger",
            "kind": trigger.kind,
            "channel": trigger.channel,
            "inverted": trigger.inverted,
            "pattern": trigger.pattern,
        }))
    }

    fn set_sample_counts(&self, pre: u32, post: u32, burst: u8) -> CommandBody {
        CommandBody::Json(json!({
            "command": "set_samples",
            "pre": pre,
            "post": post,
            "burst": burst,
        }))
    }

    fn start(&self) -> CommandBody {
        CommandBody::Json(json!({"command": "start"}))
    }

    fn stop(&self) -> CommandBody {
        CommandBody::Json(json!({"command": "stop"}))
    }

    fn status(&self) -> CommandBody {
        CommandBody::Json(json!({"command": "status"}))
    }

    fn read_samples(&self, channel: u8) -> CommandBody {
        CommandBody::Json(json!({"command": "read", "channel": channel}))
    }

    fn parse_identify(&self, frame: &Frame) -> Option<(String, String)> {
        let data = self.check_success(frame).ok()?.get("data")?;
        let name = data.get("name")?.as_str()?.to_string();
        let firmware = data.get("firmware")?.as_str()?.to_string();
        Some((name, firmware))
    }

    fn parse_number(&self, frame: &Frame) -> Option<u64> {
        self.check_success(frame).ok()?.get("data")?.as_u64()
    }

    fn parse_ack(&self, frame: &Frame) -> LaResult<()> {
        self.check_success(frame).map(|_| ())
    }

    fn parse_status(&self, frame: &Frame) -> LaResult<CaptureProgress> {
        let value = self.check_success(frame)?;
        match value.get("data").and_then(Value::as_str) {
            Some("running") => Ok(CaptureProgress::Running),
            Some("complete") => Ok(CaptureProgress::Complete),
            other => Err(LaError::Decode(format!(
                "Unexpected status reply {other:?}"
            ))),
        }
    }

    fn parse_samples(&self, frame: &Frame, expected: usize) -> LaResult<Vec<u8>> {
        let value = self.check_success(frame)?;
        let hex = value
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| LaError::Decode("Sample reply carries no data".to_string()))?;
        expect_len(decode_hex(hex)?, expected)
    }
}

// =============================================================================
// Binary protocol (opcode-framed, FIFO matching)
// =============================================================================

/// Opcodes of the binary protocol. Replies carry the request opcode with
/// [`REPLY`] set.
pub mod opcode {
    pub const IDENTIFY: u16 = 0x0001;
    pub const CHANNEL_COUNT: u16 = 0x0002;
    pub const MAX_RATE: u16 = 0x0003;
    pub const BUFFER_SIZE: u16 = 0x0004;
    pub const SET_RATE: u16 = 0x0010;
    pub const SET_CHANNELS: u16 = 0x0011;
    pub const SET_TRIGGER: u16 = 0x0012;
    pub const SET_SAMPLES: u16 = 0x0013;
    pub const START: u16 = 0x0020;
    pub const STOP: u16 = 0x0021;
    pub const STATUS: u16 = 0x0022;
    pub const READ: u16 = 0x0030;
    pub const REPLY: u16 = 0x8000;
}

struct BinaryCommands;

fn trigger_kind_code(kind: TriggerKind) -> u8 {
    match kind {
        TriggerKind::Edge => 0,
        TriggerKind::Level => 1,
        TriggerKind::Pattern => 2,
    }
}

impl BinaryCommands {
    fn payload_of<'a>(&self, frame: &'a Frame) -> LaResult<&'a Bytes> {
        match &frame.body {
            FrameBody::Binary { payload, .. } => Ok(payload),
            _ => Err(LaError::Decode("Expected a binary reply".to_string())),
        }
    }

    /// Ack payloads are `[status u8][message bytes]`, status 0 = ok.
    fn check_ack<'a>(&self, payload: &'a [u8]) -> LaResult<&'a [u8]> {
        match payload.first() {
            None => Err(LaError::Decode("Empty acknowledgement payload".to_string())),
            Some(0) => Ok(&payload[1..]),
            Some(_) => Err(LaError::DeviceError(
                String::from_utf8_lossy(&payload[1..]).into_owned(),
            )),
        }
    }
}

impl CommandSet for BinaryCommands {
    fn query(&self, query: DeviceQuery) -> CommandBody {
        let op = match query {
            DeviceQuery::Identify => opcode::IDENTIFY,
            DeviceQuery::ChannelCount => opcode::CHANNEL_COUNT,
            DeviceQuery::MaxSampleRate => opcode::MAX_RATE,
            DeviceQuery::BufferSize => opcode::BUFFER_SIZE,
        };
        CommandBody::Binary {
            opcode: op,
            payload: Bytes::new(),
        }
    }

    fn set_sample_rate(&self, hz: u32) -> CommandBody {
        CommandBody::Binary {
            opcode: opcode::SET_RATE,
            payload: Bytes::copy_from_slice(&hz.to_le_bytes()),
        }
    }

    fn set_channels(&self, indices: &[u8]) -> CommandBody {
        CommandBody::Binary {
            opcode: opcode::SET_CHANNELS,
            payload: Bytes::copy_from_slice(indices),
        }
    }

    fn set_trigger(&self, trigger: &TriggerConfig) -> CommandBody {
        let pattern = trigger.pattern.as_deref().unwrap_or("");
        let mut payload = BytesMut::with_capacity(4 + pattern.len());
        payload.put_u8(trigger_kind_code(trigger.kind));
        payload.put_u8(trigger.channel);
        payload.put_u8(u8::from(trigger.inverted));
        payload.put_u8(pattern.len() as u8);
        payload.extend_from_slice(pattern.as_bytes());
        CommandBody::Binary {
            opcode: opcode::SET_TRIGGER,
            payload: payload.freeze(),
        }
    }

    fn set_sample_counts(&self, pre: u32, post: u32, burst: u8) -> CommandBody {
        let mut payload = BytesMut::with_capacity(9);
        payload.put_u32_le(pre);
        payload.put_u32_le(post);
        payload.put_u8(burst);
        CommandBody::Binary {
            opcode: opcode::SET_SAMPLES,
            payload: payload.freeze(),
        }
    }

    fn start(&self) -> CommandBody {
        CommandBody::Binary {
            opcode: opcode::START,
            payload: Bytes::new(),
        }
    }

    fn stop(&self) -> CommandBody {
        CommandBody::Binary {
            opcode: opcode::STOP,
            payload: Bytes::new(),
        }
    }

    fn status(&self) -> CommandBody {
        CommandBody::Binary {
            opcode: opcode::STATUS,
            payload: Bytes::new(),
        }
    }

    fn read_samples(&self, channel: u8) -> CommandBody {
        CommandBody::Binary {
            opcode: opcode::READ,
            payload: Bytes::copy_from_slice(&[channel]),
        }
    }

    fn parse_identify(&self, frame: &Frame) -> Option<(String, String)> {
        // Payload: [n][name bytes][m][firmware bytes]
        let payload = self.payload_of(frame).ok()?;
        let name_len = *payload.first()? as usize;
        let name = payload.get(1..1 + name_len)?;
        let fw_len = *payload.get(1 + name_len)? as usize;
        let firmware = payload.get(2 + name_len..2 + name_len + fw_len)?;
        Some((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(firmware).into_owned(),
        ))
    }

    fn parse_number(&self, frame: &Frame) -> Option<u64> {
        let payload = self.payload_of(frame).ok()?;
        let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
        Some(u64::from(u32::from_le_bytes(bytes)))
    }

    fn parse_ack(&self, frame: &Frame) -> LaResult<()> {
        self.check_ack(self.payload_of(frame)?).map(|_| ())
    }

    fn parse_status(&self, frame: &Frame) -> LaResult<CaptureProgress> {
        let payload = self.payload_of(frame)?;
        match payload.first() {
            Some(0) => Ok(CaptureProgress::Running),
            Some(1) => Ok(CaptureProgress::Complete),
            Some(2) => Err(LaError::DeviceError(
                String::from_utf8_lossy(&payload[1..]).into_owned(),
            )),
            other => Err(LaError::Decode(format!(
                "Unexpected status code {other:?}"
            ))),
        }
    }

    fn parse_samples(&self, frame: &Frame, expected: usize) -> LaResult<Vec<u8>> {
        let payload = self.payload_of(frame)?;
        expect_len(payload.to_vec(), expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolFamily;

    fn text_frame(line: &str) -> Frame {
        Frame {
            id: None,
            body: FrameBody::Text(line.to_string()),
        }
    }

    fn edge_trigger() -> TriggerConfig {
        TriggerConfig {
            kind: TriggerKind::Edge,
            channel: 2,
            inverted: true,
            pattern: None,
        }
    }

    #[test]
    fn test_hex_roundtrip() {
        let data = vec![0x00, 0x01, 0xAB, 0xFF];
        assert_eq!(decode_hex(&encode_hex(&data)).unwrap(), data);
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }

    #[test]
    fn test_text_trigger_command() {
        let set = command_set(ProtocolFamily::Text);
        match set.set_trigger(&edge_trigger()) {
            CommandBody::Text(line) => assert_eq!(line, "CONF:TRIG EDGE,2,NEG"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_text_status_parsing() {
        let set = command_set(ProtocolFamily::Text);
        assert_eq!(
            set.parse_status(&text_frame("RUN")).unwrap(),
            CaptureProgress::Running
        );
        assert_eq!(
            set.parse_status(&text_frame("DONE")).unwrap(),
            CaptureProgress::Complete
        );
        assert!(matches!(
            set.parse_status(&text_frame("ERR: overvoltage")),
            Err(LaError::DeviceError(msg)) if msg == "overvoltage"
        ));
    }

    #[test]
    fn test_text_identify_parsing() {
        let set = command_set(ProtocolFamily::Text);
        let parsed = set.parse_identify(&text_frame("ACME LA-1024, 2.4.1"));
        assert_eq!(
            parsed,
            Some(("ACME LA-1024".to_string(), "2.4.1".to_string()))
        );
    }

    #[test]
    fn test_json_ack_failure() {
        let set = command_set(ProtocolFamily::Json);
        let frame = Frame {
            id: Some(1),
            body: FrameBody::Json(serde_json::json!({
                "id": 1, "success": false, "error": "rate unsupported"
            })),
        };
        assert!(matches!(
            set.parse_ack(&frame),
            Err(LaError::DeviceError(msg)) if msg == "rate unsupported"
        ));
    }

    #[test]
    fn test_binary_trigger_payload() {
        let set = command_set(ProtocolFamily::Binary);
        let trigger = TriggerConfig {
            kind: TriggerKind::Pattern,
            channel: 0,
            inverted: false,
            pattern: Some("1011".to_string()),
        };
        match set.set_trigger(&trigger) {
            CommandBody::Binary { opcode: op, payload } => {
                assert_eq!(op, opcode::SET_TRIGGER);
                assert_eq!(&payload[..4], &[2, 0, 0, 4]);
                assert_eq!(&payload[4..], b"1011");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_binary_identify_parsing() {
        let set = command_set(ProtocolFamily::Binary);
        let mut payload = vec![4u8];
        payload.extend_from_slice(b"MOCK");
        payload.push(3);
        payload.extend_from_slice(b"1.0");
        let frame = Frame {
            id: None,
            body: FrameBody::Binary {
                opcode: opcode::IDENTIFY | opcode::REPLY,
                payload: Bytes::from(payload),
            },
        };
        assert_eq!(
            set.parse_identify(&frame),
            Some(("MOCK".to_string(), "1.0".to_string()))
        );
    }

    #[test]
    fn test_binary_status_error() {
        let set = command_set(ProtocolFamily::Binary);
        let mut payload = vec![2u8];
        payload.extend_from_slice(b"buffer overrun");
        let frame = Frame {
            id: None,
            body: FrameBody::Binary {
                opcode: opcode::STATUS | opcode::REPLY,
                payload: Bytes::from(payload),
            },
        };
        assert!(matches!(
            set.parse_status(&frame),
            Err(LaError::DeviceError(msg)) if msg == "buffer overrun"
        ));
    }
}
