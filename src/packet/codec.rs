//! Length-Prefixed Packet Codec
//!
//! Every frame on the wire is a 4-byte little-endian signed length followed
//! by that many body bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::PacketStream;
use crate::error::PacketError;

/// Size of the frame length header
pub const HEADER_SIZE: usize = 4;

/// Largest frame body accepted when nothing else is configured (1 MiB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Splits a byte stream into packets and frames outbound packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Take the next complete frame out of `buf`.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete; the partial
    /// bytes stay in `buf` and more capacity is reserved for the rest.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<PacketStream>, PacketError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length = (&buf[..HEADER_SIZE]).get_i32_le();
        if length < 0 {
            return Err(PacketError::InvalidLength(length));
        }

        let length = length as usize;
        if length > self.max_packet_size {
            return Err(PacketError::FrameTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }

        let frame_len = HEADER_SIZE + length;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        Ok(Some(PacketStream::from(buf.split_to(length))))
    }

    /// Frame `packet` for the wire
    pub fn encode(&self, packet: &PacketStream) -> Result<Bytes, PacketError> {
        let size = packet.len();
        if size > self.max_packet_size || size > i32::MAX as usize {
            return Err(PacketError::FrameTooLarge {
                size,
                max: self.max_packet_size,
            });
        }

        let mut frame = BytesMut::with_capacity(HEADER_SIZE + size);
        frame.put_i32_le(size as i32);
        frame.extend_from_slice(packet.as_bytes());
        Ok(frame.freeze())
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}
