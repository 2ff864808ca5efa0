//! Packet buffer implementation
//!
//! Provides a byte buffer with the read/write operations the wire protocol
//! needs:
//! - Little-endian fixed-width integers and floats
//! - Length-prefixed UTF-8 strings
//!
//! Every read is bounds-checked and fails with
//! [`ProtocolError::MalformedMessage`] instead of reading past the end.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::Vec3;

use crate::error::ProtocolError;

/// Maximum packet size (64KB)
pub const MAX_PACKET_SIZE: usize = 65535;

/// Packet buffer for reading and writing protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    // ============ Properties ============

    /// Get the current read position
    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Check if there are bytes remaining to read
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Get a reference to the underlying bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes into an immutable payload
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Fail unless at least `needed` bytes are left to read
    pub fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(ProtocolError::MalformedMessage { needed, remaining });
        }
        Ok(())
    }

    fn take(&mut self, count: usize) -> Result<&[u8], ProtocolError> {
        self.ensure(count)?;
        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.data[start..start + count])
    }

    // ============ Reading Methods (Little-Endian) ============

    /// Read an unsigned little-endian short (2 bytes)
    pub fn read_u16_le(&mut self) -> Result<u16, ProtocolError> {
        let mut bytes = self.take(2)?;
        Ok(bytes.get_u16_le())
    }

    /// Read an unsigned little-endian int (4 bytes)
    pub fn read_u32_le(&mut self) -> Result<u32, ProtocolError> {
        let mut bytes = self.take(4)?;
        Ok(bytes.get_u32_le())
    }

    /// Read a little-endian IEEE-754 single (4 bytes)
    pub fn read_f32_le(&mut self) -> Result<f32, ProtocolError> {
        let mut bytes = self.take(4)?;
        Ok(bytes.get_f32_le())
    }

    /// Read three consecutive singles as a vector (x, y, z)
    pub fn read_vec3(&mut self) -> Result<Vec3, ProtocolError> {
        self.ensure(12)?;
        let x = self.read_f32_le()?;
        let y = self.read_f32_le()?;
        let z = self.read_f32_le()?;
        Ok(Vec3::new(x, y, z))
    }

    // ============ String Reading ============

    /// Read a length-prefixed UTF-8 string (u32 byte length)
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let length = self.read_u32_le()? as usize;
        let bytes = self.take(length)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidString)
    }

    // ============ Writing Methods (Little-Endian) ============

    /// Write an unsigned little-endian short (2 bytes)
    pub fn write_u16_le(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    /// Write an unsigned little-endian int (4 bytes)
    pub fn write_u32_le(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    /// Write a little-endian IEEE-754 single (4 bytes)
    pub fn write_f32_le(&mut self, value: f32) {
        self.data.put_f32_le(value);
    }

    /// Write a vector as three consecutive singles (x, y, z)
    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32_le(value.x);
        self.write_f32_le(value.y);
        self.write_f32_le(value.z);
    }

    /// Write a length-prefixed UTF-8 string (u32 byte length)
    pub fn write_string(&mut self, value: &str) {
        self.write_u32_le(value.len() as u32);
        self.data.put_slice(value.as_bytes());
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }
}
