//! Wire framing: a 4-byte big-endian length prefix followed by the payload.
//!
//! No trailer, no checksum, no keep-alive frames. Length bounds are enforced
//! by the transport against its configured `max_message_size`.

use std::net::TcpStream;

use crate::error::NetResult;
use crate::socket::send_exact;

/// Size of the length prefix.
pub const HEADER_SIZE: usize = 4;

/// Decodes the big-endian length prefix.
#[inline]
#[must_use]
pub fn decode_length(header: [u8; HEADER_SIZE]) -> usize {
    u32::from_be_bytes(header) as usize
}

/// Encodes the length prefix for a payload.
#[inline]
#[must_use]
pub fn encode_length(length: usize) -> [u8; HEADER_SIZE] {
    (length as u32).to_be_bytes()
}

/// Builds a full frame (header + payload) as one buffer.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&encode_length(payload.len()));
    frame.extend_from_slice(payload);
    frame
}

/// Writes one frame with a single exact send, so the bytes of concurrent
/// responses on *different* connections can never interleave within this one.
pub fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> NetResult<()> {
    send_exact(stream, &encode_frame(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_is_big_endian() {
        assert_eq!(encode_length(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(decode_length([0, 0, 0, 52]), 52);
        assert_eq!(decode_length([0, 16, 0, 0]), 1024 * 1024);
    }

    #[test]
    fn frames_carry_header_plus_payload() {
        let frame = encode_frame(b"{\"ok\":true}");
        assert_eq!(frame.len(), HEADER_SIZE + 11);
        assert_eq!(&frame[..HEADER_SIZE], &[0, 0, 0, 11]);
        assert_eq!(&frame[HEADER_SIZE..], b"{\"ok\":true}");
    }

    #[test]
    fn empty_payload_is_a_valid_frame() {
        assert_eq!(encode_frame(b""), vec![0, 0, 0, 0]);
    }
}
