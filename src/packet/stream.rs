//! Packet Stream

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// One application message: a byte buffer with a read cursor.
///
/// Writes always append at the end of the buffer. Reads consume from the
/// cursor and fail with [`PacketError::UnexpectedEnd`] instead of panicking
/// when the packet is too short. Multi-byte values are little-endian.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketStream {
    buffer: BytesMut,
    position: usize,
}

impl PacketStream {
    /// Create an empty packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty packet with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            position: 0,
        }
    }

    /// Total number of bytes in the packet
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current read cursor
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the read cursor and the end of the packet
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Move the read cursor back to the start of the packet
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// The whole packet body, independent of the read cursor
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.put_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.put_u16_le(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buffer.put_i32_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.put_u32_le(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buffer.put_u64_le(value);
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.buffer.put_f32_le(value);
        self
    }

    /// Append raw bytes without a length prefix
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(value);
        self
    }

    /// Append a UTF-8 string prefixed with its byte length as `u32`.
    ///
    /// Fails with [`PacketError::StringTooLong`] if the length does not fit
    /// the prefix; nothing is written in that case.
    pub fn write_string(&mut self, value: &str) -> Result<&mut Self, PacketError> {
        let len = string_prefix(value.len())?;
        self.write_u32(len);
        Ok(self.write_bytes(value.as_bytes()))
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        let mut bytes = self.take(1)?;
        Ok(bytes.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, PacketError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        let mut bytes = self.take(2)?;
        Ok(bytes.get_u16_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, PacketError> {
        let mut bytes = self.take(4)?;
        Ok(bytes.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        let mut bytes = self.take(4)?;
        Ok(bytes.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        let mut bytes = self.take(8)?;
        Ok(bytes.get_u64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, PacketError> {
        let mut bytes = self.take(4)?;
        Ok(bytes.get_f32_le())
    }

    /// Read exactly `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, PacketError> {
        let bytes = self.take(len)?;
        Ok(Bytes::copy_from_slice(bytes))
    }

    /// Read a string written by [`PacketStream::write_string`]
    pub fn read_string(&mut self) -> Result<String, PacketError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PacketError::InvalidUtf8)
    }

    fn take(&mut self, needed: usize) -> Result<&[u8], PacketError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(PacketError::UnexpectedEnd { needed, remaining });
        }

        let start = self.position;
        self.position += needed;
        Ok(&self.buffer[start..start + needed])
    }
}

fn string_prefix(len: usize) -> Result<u32, PacketError> {
    u32::try_from(len).map_err(|_| PacketError::StringTooLong { len })
}

impl From<BytesMut> for PacketStream {
    fn from(buffer: BytesMut) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }
}

impl From<&[u8]> for PacketStream {
    fn from(bytes: &[u8]) -> Self {
        Self::from(BytesMut::from(bytes))
    }
}

impl From<Vec<u8>> for PacketStream {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(&bytes[..])
    }
}
