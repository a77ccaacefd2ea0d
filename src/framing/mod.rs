//! Wire framing.
//!
//! A [`FrameCodec`] converts outbound logical commands into wire bytes and
//! accumulates inbound transport chunks into complete logical frames. Decoding
//! is incremental and resumable: bytes arrive in arbitrary chunks (one byte at
//! a time up to many frames at once) and the codec's internal remainder buffer
//! guarantees no frame is lost or duplicated across calls. A decode error
//! consumes the damaged region and the stream continues — codecs never stall.
//!
//! Three framings are supported, selected per protocol family:
//!
//! - [`text::LineCodec`] — `\n`-terminated ASCII, no correlation id (FIFO).
//! - [`json::JsonLineCodec`] — single-line JSON objects with a numeric `id`.
//! - [`binary::BinaryCodec`] — `[sync u16 = 0x55AA][opcode u16][len u32]` +
//!   payload + optional XOR checksum, resynchronizing on the sync marker.

pub mod binary;
pub mod json;
pub mod text;

use crate::config::ProtocolFamily;
use crate::error::LaResult;
use bytes::Bytes;

/// Body of one outbound command, before framing.
#[derive(Debug, Clone)]
pub enum CommandBody {
    Text(String),
    Json(serde_json::Value),
    Binary { opcode: u16, payload: Bytes },
}

/// Body of one complete inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    Text(String),
    Json(serde_json::Value),
    Binary { opcode: u16, payload: Bytes },
}

/// One complete, delimited unit of wire data.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Correlation id, for framings that carry one.
    pub id: Option<u64>,
    pub body: FrameBody,
}

/// Incremental encoder/decoder for one framing.
pub trait FrameCodec: Send {
    /// Encode an outbound command. For id-bearing framings, `id` is stamped
    /// into the frame; FIFO framings ignore it.
    fn encode(&self, command: &CommandBody, id: Option<u64>) -> LaResult<Bytes>;

    /// Append raw transport bytes to the internal remainder buffer.
    fn push(&mut self, chunk: &[u8]);

    /// Pop the next complete frame, if one is buffered.
    ///
    /// `Some(Err(_))` reports a damaged frame whose bytes have already been
    /// consumed; calling again continues with the rest of the stream.
    fn next_frame(&mut self) -> Option<LaResult<Frame>>;

    /// Whether this framing carries a correlation id.
    fn id_bearing(&self) -> bool;
}

/// Build the codec for a protocol family.
pub fn make_codec(family: ProtocolFamily) -> Box<dyn FrameCodec> {
    match family {
        ProtocolFamily::Text => Box::new(text::LineCodec::new()),
        ProtocolFamily::Json => Box::new(json::JsonLineCodec::new()),
        ProtocolFamily::Binary => Box::new(binary::BinaryCodec::new(true)),
    }
}
