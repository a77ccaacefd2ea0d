//! Length-prefixed binary framing.
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! [sync: u16 = 0x55AA][opcode: u16][payload_len: u32][payload][checksum: u16]
//! ```
//!
//! The trailing checksum is optional (device-dependent) and is the XOR of the
//! opcode, length, and payload bytes folded into 16-bit words. A frame is only
//! complete once the declared payload length is fully buffered, so partial
//! reads accumulate across transport callbacks. On checksum mismatch or a
//! damaged header the codec reports a decode error and resynchronizes on the
//! next sync marker without stalling the stream.

use super::{CommandBody, Frame, FrameBody, FrameCodec};
use crate::error::{LaError, LaResult};
use bytes::{Buf, Bytes, BytesMut};

pub const SYNC: u16 = 0x55AA;
const SYNC_BYTES: [u8; 2] = SYNC.to_le_bytes();
const HEADER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 2;

/// Upper bound on a sane payload; larger declared lengths are treated as
/// header corruption rather than waiting forever for bytes that never come.
const MAX_PAYLOAD: usize = 1 << 24;

/// XOR of the data folded into little-endian 16-bit words. A trailing odd
/// byte contributes as the low byte of a final word.
fn xor16(data: &[u8]) -> u16 {
    let mut acc = 0u16;
    for pair in data.chunks(2) {
        let word = u16::from_le_bytes([pair[0], *pair.get(1).unwrap_or(&0)]);
        acc ^= word;
    }
    acc
}

pub struct BinaryCodec {
    checksum: bool,
    buf: BytesMut,
}

impl BinaryCodec {
    pub fn new(checksum: bool) -> Self {
        Self {
            checksum,
            buf: BytesMut::new(),
        }
    }

    fn find_sync(&self) -> Option<usize> {
        self.buf
            .windows(2)
            .position(|w| w == SYNC_BYTES)
    }
}

impl FrameCodec for BinaryCodec {
    fn encode(&self, command: &CommandBody, _id: Option<u64>) -> LaResult<Bytes> {
        let (opcode, payload) = match command {
            CommandBody::Binary { opcode, payload } => (*opcode, payload),
            other => {
                return Err(LaError::Unexpected(format!(
                    "Binary framing cannot encode {other:?}"
                )))
            }
        };

        let trailer = if self.checksum { CHECKSUM_LEN } else { 0 };
        let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len() + trailer);
        out.extend_from_slice(&SYNC_BYTES);
        out.extend_from_slice(&opcode.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if self.checksum {
            let sum = xor16(&out[2..]);
            out.extend_from_slice(&sum.to_le_bytes());
        }
        Ok(out.freeze())
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> Option<LaResult<Frame>> {
        if self.buf.len() < 2 {
            return None;
        }

        if self.buf[..2] != SYNC_BYTES {
            // Drop garbage up to the next sync marker (or all but the final
            // byte, which may be the start of one) and report the loss.
            let skipped = match self.find_sync() {
                Some(pos) => pos,
                None => self.buf.len() - 1,
            };
            self.buf.advance(skipped);
            return Some(Err(LaError::Decode(format!(
                "Desynchronized: skipped {skipped} bytes"
            ))));
        }

        if self.buf.len() < HEADER_LEN {
            return None;
        }

        let opcode = u16::from_le_bytes([self.buf[2], self.buf[3]]);
        let len =
            u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;

        if len > MAX_PAYLOAD {
            // Corrupted header: skip the marker and rescan.
            self.buf.advance(2);
            return Some(Err(LaError::Decode(format!(
                "Implausible payload length {len}"
            ))));
        }

        let trailer = if self.checksum { CHECKSUM_LEN } else { 0 };
        let total = HEADER_LEN + len + trailer;
        if self.buf.len() < total {
            return None;
        }

        let frame = self.buf.split_to(total);
        if self.checksum {
            let declared = u16::from_le_bytes([frame[total - 2], frame[total - 1]]);
            let actual = xor16(&frame[2..total - CHECKSUM_LEN]);
            if declared != actual {
                return Some(Err(LaError::Decode(format!(
                    "Checksum mismatch on opcode {opcode:#06x}"
                ))));
            }
        }

        let payload = Bytes::copy_from_slice(&frame[HEADER_LEN..HEADER_LEN + len]);
        Some(Ok(Frame {
            id: None,
            body: FrameBody::Binary { opcode, payload },
        }))
    }

    fn id_bearing(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(codec: &BinaryCodec, opcode: u16, payload: &[u8]) -> Bytes {
        codec
            .encode(
                &CommandBody::Binary {
                    opcode,
                    payload: Bytes::copy_from_slice(payload),
                },
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let mut codec = BinaryCodec::new(true);
        let wire = encode(&codec, 0x0022, &[1, 2, 3, 4, 5]);
        codec.push(&wire);
        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(
            frame.body,
            FrameBody::Binary {
                opcode: 0x0022,
                payload: Bytes::from_static(&[1, 2, 3, 4, 5])
            }
        );
        assert!(codec.next_frame().is_none());
    }

    #[test]
    fn test_zero_length_payload() {
        let mut codec = BinaryCodec::new(true);
        let wire = encode(&codec, 0x0020, &[]);
        assert_eq!(wire.len(), 10);
        codec.push(&wire);
        let frame = codec.next_frame().unwrap().unwrap();
        match frame.body {
            FrameBody::Binary { opcode, payload } => {
                assert_eq!(opcode, 0x0020);
                assert!(payload.is_empty());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_one_byte_chunks_match_single_call() {
        let mut whole = BinaryCodec::new(true);
        let mut dribble = BinaryCodec::new(true);
        let wire = encode(&whole, 0x0030, &[0xDE, 0xAD, 0xBE, 0xEF]);

        whole.push(&wire);
        let expected = whole.next_frame().unwrap().unwrap();

        for &b in wire.iter() {
            dribble.push(&[b]);
        }
        let got = dribble.next_frame().unwrap().unwrap();
        assert_eq!(got, expected);
        assert!(dribble.next_frame().is_none());
    }

    #[test]
    fn test_checksum_mismatch_is_error_not_garbage() {
        let mut codec = BinaryCodec::new(true);
        let mut wire = BytesMut::from(&encode(&codec, 0x0010, &[9, 9, 9])[..]);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        codec.push(&wire);
        assert!(matches!(
            codec.next_frame().unwrap(),
            Err(LaError::Decode(_))
        ));

        // The stream resumes on the next good frame.
        let good = encode(&codec, 0x0011, &[7]);
        codec.push(&good);
        let frame = codec.next_frame().unwrap().unwrap();
        match frame.body {
            FrameBody::Binary { opcode, .. } => assert_eq!(opcode, 0x0011),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut codec = BinaryCodec::new(true);
        codec.push(&[0x00, 0x01, 0x02]);
        let good = encode(&codec, 0x0001, &[5]);
        codec.push(&good);
        assert!(codec.next_frame().unwrap().is_err());
        let frame = codec.next_frame().unwrap().unwrap();
        match frame.body {
            FrameBody::Binary { opcode, .. } => assert_eq!(opcode, 0x0001),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_partial_header_waits() {
        let mut codec = BinaryCodec::new(true);
        codec.push(&SYNC_BYTES);
        codec.push(&[0x22, 0x00, 0x04]);
        assert!(codec.next_frame().is_none());
    }

    #[test]
    fn test_no_checksum_mode() {
        let mut codec = BinaryCodec::new(false);
        let wire = encode(&codec, 0x0002, &[1, 2]);
        assert_eq!(wire.len(), HEADER_LEN + 2);
        codec.push(&wire);
        assert!(codec.next_frame().unwrap().is_ok());
    }

    #[test]
    fn test_xor16_odd_length() {
        assert_eq!(xor16(&[0x01]), 0x0001);
        assert_eq!(xor16(&[0x01, 0x02, 0x03]), 0x0201 ^ 0x0003);
    }
}
