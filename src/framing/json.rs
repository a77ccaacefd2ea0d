//! Single-line JSON framing with correlation ids.

use super::{CommandBody, Frame, FrameBody, FrameCodec};
use crate::error::{LaError, LaResult};
use bytes::{Bytes, BytesMut};
use serde_json::Value;

/// JSON line codec.
///
/// Requests are single-line objects stamped with a numeric `id` field;
/// responses carry the same `id` back for correlation. A line that fails to
/// parse yields a decode error without losing subsequent lines.
pub struct JsonLineCodec {
    buf: BytesMut,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for JsonLineCodec {
    fn encode(&self, command: &CommandBody, id: Option<u64>) -> LaResult<Bytes> {
        let object = match command {
            CommandBody::Json(value) => value,
            other => {
                return Err(LaError::Unexpected(format!(
                    "JSON framing cannot encode {other:?}"
                )))
            }
        };

        let mut object = object.clone();
        if let (Some(id), Some(map)) = (id, object.as_object_mut()) {
            map.insert("id".to_string(), Value::from(id));
        }

        let line = serde_json::to_string(&object)
            .map_err(|e| LaError::Unexpected(format!("JSON serialization failed: {e}")))?;

        let mut out = BytesMut::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\n");
        Ok(out.freeze())
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> Option<LaResult<Frame>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(newline + 1);
        let line = &line[..newline];

        let value: Value = match serde_json::from_slice(line) {
            Ok(v) => v,
            Err(e) => return Some(Err(LaError::Decode(format!("Invalid JSON line: {e}")))),
        };

        let id = value.get("id").and_then(Value::as_u64);
        Some(Ok(Frame {
            id,
            body: FrameBody::Json(value),
        }))
    }

    fn id_bearing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_stamps_id() {
        let codec = JsonLineCodec::new();
        let body = CommandBody::Json(json!({"command": "status"}));
        let bytes = codec.encode(&body, Some(7)).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["command"], "status");
        assert_eq!(bytes[bytes.len() - 1], b'\n');
    }

    #[test]
    fn test_decode_extracts_id() {
        let mut codec = JsonLineCodec::new();
        codec.push(b"{\"id\":42,\"success\":true}\n");
        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.id, Some(42));
        match frame.body {
            FrameBody::Json(v) => assert_eq!(v["success"], true),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_parse_failure_keeps_stream_alive() {
        let mut codec = JsonLineCodec::new();
        codec.push(b"{not json\n{\"id\":1,\"success\":true}\n");
        assert!(codec.next_frame().unwrap().is_err());
        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.id, Some(1));
    }

    #[test]
    fn test_incremental_chunks() {
        let mut codec = JsonLineCodec::new();
        let wire = b"{\"id\":3,\"success\":true}\n";
        for &b in wire.iter() {
            codec.push(&[b]);
        }
        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.id, Some(3));
        assert!(codec.next_frame().is_none());
    }
}
