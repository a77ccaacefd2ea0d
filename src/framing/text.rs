//! Newline-delimited ASCII framing.

use super::{CommandBody, Frame, FrameBody, FrameCodec};
use crate::error::{LaError, LaResult};
use bytes::{Bytes, BytesMut};

/// Text line codec: commands are strings terminated by `\n`, responses split
/// on `\n` and trimmed. Carries no correlation id, so responses are matched
/// FIFO against outstanding commands.
pub struct LineCodec {
    buf: BytesMut,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for LineCodec {
    fn encode(&self, command: &CommandBody, _id: Option<u64>) -> LaResult<Bytes> {
        match command {
            CommandBody::Text(line) => {
                let mut out = BytesMut::with_capacity(line.len() + 1);
                out.extend_from_slice(line.as_bytes());
                out.extend_from_slice(b"\n");
                Ok(out.freeze())
            }
            other => Err(LaError::Unexpected(format!(
                "Text framing cannot encode {other:?}"
            ))),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> Option<LaResult<Frame>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(newline + 1);
        let line = &line[..newline];

        match std::str::from_utf8(line) {
            Ok(text) => Some(Ok(Frame {
                id: None,
                body: FrameBody::Text(text.trim().to_string()),
            })),
            Err(_) => Some(Err(LaError::Decode(
                "Response line is not valid UTF-8".to_string(),
            ))),
        }
    }

    fn id_bearing(&self) -> bool {
        false
    }
}
