//! AMQP 0-9-1 frame envelope: header + payload + sentinel.
//!
//! Decoding is zero-copy: a successfully decoded [`Frame`] borrows its
//! payload directly out of the caller's buffer.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use super::constants::{FRAME_END, MAX_FRAME_SIZE};

pub const HEADER_LEN: usize = 1 + 2 + 4;
pub const FRAME_OVERHEAD: usize = HEADER_LEN + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} exceeds max frame size {1}")]
    TooLarge(u32, u32),
    #[error("frame sentinel byte was {0:#x}, expected 0xCE")]
    BadSentinel(u8),
}

/// A decoded frame, borrowing its payload from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub frame_type: u8,
    pub channel: u16,
    pub payload: &'a [u8],
}

/// Result of attempting to decode one frame from the front of a buffer.
pub enum Decoded<'a> {
    /// A complete frame, and the number of bytes it consumed.
    Frame(Frame<'a>, usize),
    /// Not enough bytes buffered yet; try again once more data arrives.
    Incomplete,
}

/// Decode one frame from the front of `buf`, bounded by `max_frame_size`
/// (callers should pass the session's negotiated max, defaulting to
/// [`MAX_FRAME_SIZE`]).
///
/// On `Incomplete`, `buf` is left untouched so the caller can retry after
/// appending more bytes.
pub fn decode<'a>(buf: &'a [u8], max_frame_size: u32) -> Result<Decoded<'a>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::Incomplete);
    }

    let frame_type = buf[0];
    let channel = u16::from_be_bytes([buf[1], buf[2]]);
    let length = u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]);

    if length > max_frame_size {
        return Err(FrameError::TooLarge(length, max_frame_size));
    }

    let total = HEADER_LEN + length as usize + 1;
    if buf.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let sentinel = buf[total - 1];
    if sentinel != FRAME_END {
        return Err(FrameError::BadSentinel(sentinel));
    }

    let payload = &buf[HEADER_LEN..total - 1];
    Ok(Decoded::Frame(
        Frame {
            frame_type,
            channel,
            payload,
        },
        total,
    ))
}

/// Encode a frame into `out`, appending header + payload + sentinel.
pub fn encode(out: &mut BytesMut, frame_type: u8, channel: u16, payload: &[u8]) {
    out.reserve(FRAME_OVERHEAD + payload.len());
    out.put_u8(frame_type);
    out.put_u16(channel);
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out.put_u8(FRAME_END);
}

/// Convenience wrapper returning a freshly allocated buffer.
pub fn encode_to_vec(frame_type: u8, channel: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    encode(&mut out, frame_type, channel, payload);
    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let payload = b"hello world";
        let encoded = encode_to_vec(1, 0, payload);
        match decode(&encoded, MAX_FRAME_SIZE).unwrap() {
            Decoded::Frame(frame, consumed) => {
                assert_eq!(frame.frame_type, 1);
                assert_eq!(frame.channel, 0);
                assert_eq!(frame.payload, payload);
                assert_eq!(consumed, encoded.len());
            }
            Decoded::Incomplete => panic!("expected a full frame"),
        }
    }

    #[test]
    fn truncated_header_is_incomplete() {
        let encoded = encode_to_vec(1, 0, b"payload");
        for n in 0..HEADER_LEN {
            assert!(matches!(
                decode(&encoded[..n], MAX_FRAME_SIZE).unwrap(),
                Decoded::Incomplete
            ));
        }
    }

    #[test]
    fn truncated_payload_is_incomplete_and_buffer_untouched() {
        let encoded = encode_to_vec(1, 0, b"0123456789");
        for n in HEADER_LEN..encoded.len() {
            let slice = &encoded[..n];
            assert!(matches!(
                decode(slice, MAX_FRAME_SIZE).unwrap(),
                Decoded::Incomplete
            ));
            assert_eq!(slice, &encoded[..n]);
        }
    }

    #[test]
    fn bad_sentinel_is_an_error() {
        let mut encoded = encode_to_vec(1, 0, b"x");
        let last = encoded.len() - 1;
        encoded[last] = 0x00;
        assert_eq!(
            decode(&encoded, MAX_FRAME_SIZE).unwrap_err(),
            FrameError::BadSentinel(0x00)
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let encoded = encode_to_vec(1, 0, &vec![0u8; 16]);
        assert_eq!(
            decode(&encoded, 8).unwrap_err(),
            FrameError::TooLarge(16, 8)
        );
    }

    #[test]
    fn heartbeat_frame_has_empty_payload() {
        let encoded = encode_to_vec(8, 0, &[]);
        match decode(&encoded, MAX_FRAME_SIZE).unwrap() {
            Decoded::Frame(frame, consumed) => {
                assert_eq!(frame.frame_type, 8);
                assert!(frame.payload.is_empty());
                assert_eq!(consumed, FRAME_OVERHEAD);
            }
            Decoded::Incomplete => panic!("expected a full frame"),
        }
    }
}
