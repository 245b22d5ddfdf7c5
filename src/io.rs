//! Seekable little-endian reader/writer over an in-memory buffer.
//!
//! Every CR2W structure is offset-addressed, so parsing is a sequence of
//! seeks and fixed-width reads rather than a streaming pass. `ByteCursor`
//! wraps a byte vector with a position, bounds-checked reads that fail with
//! [`Error::UnexpectedEof`], and writes that extend the backing store.

use byteorder::{ByteOrder, LittleEndian};
use half::f16;

use crate::error::{Error, Result};

/// A seekable little-endian cursor over owned bytes.
///
/// Reads never panic: running past the end returns [`Error::UnexpectedEof`]
/// and leaves the position where the read started. Writes past the end
/// zero-fill the gap and grow the buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteCursor {
    data: Vec<u8>,
    pos: usize,
}

impl ByteCursor {
    /// Cursor over existing bytes, positioned at 0.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Empty growable cursor for writing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Current position.
    #[must_use]
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Total length of the backing store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the backing store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes between the current position and the end.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Move to an absolute offset. Seeking past the end is allowed; the
    /// next write will grow the buffer, the next read will fail.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Move relative to the current position.
    pub fn skip(&mut self, delta: i64) {
        self.pos = (self.pos as i64 + delta).max(0) as usize;
    }

    /// Borrow the full backing store.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the cursor, returning the backing store.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                len: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    // ---- reads ----

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read an IEEE 754 half-precision float, widened to f32.
    pub fn read_f16(&mut self) -> Result<f32> {
        Ok(f16::from_bits(self.read_u16()?).to_f32())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Read a null-terminated string. The terminator is consumed.
    pub fn read_cstring(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            let len = self.data.len();
            self.pos = start;
            return Err(Error::UnexpectedEof { offset: start, len });
        }
        let s = String::from_utf8(self.data[start..self.pos].to_vec())?;
        self.pos += 1;
        Ok(s)
    }

    // ---- position-preserving peeks ----
    //
    // Each helper restores the cursor on every path, including the error
    // path of a failed read.

    pub fn u16_at(&mut self, pos: usize) -> Result<u16> {
        let saved = self.pos;
        self.pos = pos;
        let value = self.read_u16();
        self.pos = saved;
        value
    }

    pub fn u32_at(&mut self, pos: usize) -> Result<u32> {
        let saved = self.pos;
        self.pos = pos;
        let value = self.read_u32();
        self.pos = saved;
        value
    }

    pub fn f32_at(&mut self, pos: usize) -> Result<f32> {
        let saved = self.pos;
        self.pos = pos;
        let value = self.read_f32();
        self.pos = saved;
        value
    }

    pub fn write_u32_at(&mut self, pos: usize, value: u32) {
        let saved = self.pos;
        self.pos = pos;
        self.write_u32(value);
        self.pos = saved;
    }

    pub fn write_u16_at(&mut self, pos: usize, value: u16) {
        let saved = self.pos;
        self.pos = pos;
        self.write_u16(value);
        self.pos = saved;
    }

    pub fn write_f32_at(&mut self, pos: usize, value: f32) {
        let saved = self.pos;
        self.pos = pos;
        self.write_f32(value);
        self.pos = saved;
    }

    // ---- writes ----

    fn reserve_at_pos(&mut self, n: usize) {
        if self.pos + n > self.data.len() {
            self.data.resize(self.pos + n, 0);
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.reserve_at_pos(1);
        self.data[self.pos] = value;
        self.pos += 1;
    }

    pub fn write_u16(&mut self, value: u16) {
        self.reserve_at_pos(2);
        LittleEndian::write_u16(&mut self.data[self.pos..], value);
        self.pos += 2;
    }

    pub fn write_i16(&mut self, value: i16) {
        self.reserve_at_pos(2);
        LittleEndian::write_i16(&mut self.data[self.pos..], value);
        self.pos += 2;
    }

    pub fn write_u32(&mut self, value: u32) {
        self.reserve_at_pos(4);
        LittleEndian::write_u32(&mut self.data[self.pos..], value);
        self.pos += 4;
    }

    pub fn write_i32(&mut self, value: i32) {
        self.reserve_at_pos(4);
        LittleEndian::write_i32(&mut self.data[self.pos..], value);
        self.pos += 4;
    }

    pub fn write_f32(&mut self, value: f32) {
        self.reserve_at_pos(4);
        LittleEndian::write_f32(&mut self.data[self.pos..], value);
        self.pos += 4;
    }

    /// Write an f32 narrowed to IEEE 754 half precision.
    pub fn write_f16(&mut self, value: f32) {
        self.write_u16(f16::from_f32(value).to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.reserve_at_pos(bytes.len());
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let mut c = ByteCursor::empty();
        c.write_u32(0xDEADBEEF);
        c.write_i16(-1234);
        c.write_f32(1.5);
        c.write_f16(0.25);

        c.seek(0);
        assert_eq!(c.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(c.read_i16().unwrap(), -1234);
        assert_eq!(c.read_f32().unwrap(), 1.5);
        assert_eq!(c.read_f16().unwrap(), 0.25);
    }

    #[test]
    fn read_past_end_fails_and_keeps_position() {
        let mut c = ByteCursor::new(vec![1, 2]);
        c.seek(1);
        assert!(matches!(
            c.read_u32(),
            Err(Error::UnexpectedEof { offset: 1, len: 2 })
        ));
        assert_eq!(c.tell(), 1);
    }

    #[test]
    fn peek_restores_position_on_error() {
        let mut c = ByteCursor::new(vec![0u8; 8]);
        c.seek(4);
        assert!(c.u32_at(100).is_err());
        assert_eq!(c.tell(), 4);
        assert_eq!(c.u32_at(0).unwrap(), 0);
        assert_eq!(c.tell(), 4);
    }

    #[test]
    fn write_past_end_extends() {
        let mut c = ByteCursor::new(vec![1, 2]);
        c.seek(6);
        c.write_u16(7);
        assert_eq!(c.len(), 8);
        assert_eq!(c.bytes(), &[1, 2, 0, 0, 0, 0, 7, 0]);
    }

    #[test]
    fn cstring_round_trip() {
        let mut c = ByteCursor::new(b"CMesh\0numVertices\0".to_vec());
        assert_eq!(c.read_cstring().unwrap(), "CMesh");
        assert_eq!(c.read_cstring().unwrap(), "numVertices");
        assert!(c.read_cstring().is_err());
    }
}
