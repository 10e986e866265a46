//! Little-endian buffer reader and writer for manifest and info files.
//!
//! Strings are a `u16` byte length followed by UTF-8 bytes; string arrays and
//! `i32` arrays are a `u16` element count followed by the elements.

use super::error::{ManifestError, ManifestResult};

/// Growable little-endian writer.
#[derive(Debug, Default)]
pub struct BufferWriter {
    buf: Vec<u8>,
}

impl BufferWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_utf8(&mut self, value: &str) -> ManifestResult<()> {
        let len = Self::prefix("string", value.len())?;
        self.write_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Write a count-prefixed array of strings.
    pub fn write_utf8_array(&mut self, values: &[String]) -> ManifestResult<()> {
        let count = Self::prefix("string array", values.len())?;
        self.write_u16(count);
        for value in values {
            self.write_utf8(value)?;
        }
        Ok(())
    }

    /// Write a count-prefixed array of `i32`.
    pub fn write_i32_array(&mut self, values: &[i32]) -> ManifestResult<()> {
        let count = Self::prefix("int array", values.len())?;
        self.write_u16(count);
        for value in values {
            self.write_i32(*value);
        }
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer and return the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn prefix(what: &'static str, len: usize) -> ManifestResult<u16> {
        u16::try_from(len).map_err(|_| ManifestError::TooLarge { what, len })
    }
}

/// Cursor over an owned byte buffer.
#[derive(Debug)]
pub struct BufferReader {
    data: Vec<u8>,
    pos: usize,
}

impl BufferReader {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> ManifestResult<&[u8]> {
        if self.remaining() < needed {
            return Err(ManifestError::UnexpectedEof {
                offset: self.pos,
                needed,
            });
        }
        let start = self.pos;
        self.pos += needed;
        Ok(&self.data[start..self.pos])
    }

    fn take_array<const N: usize>(&mut self) -> ManifestResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> ManifestResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> ManifestResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> ManifestResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> ManifestResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> ManifestResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> ManifestResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_utf8(&mut self) -> ManifestResult<String> {
        let len = self.read_u16()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| ManifestError::InvalidUtf8 { offset })
    }

    /// Read a count-prefixed array of strings.
    pub fn read_utf8_array(&mut self) -> ManifestResult<Vec<String>> {
        let count = self.read_u16()? as usize;
        (0..count).map(|_| self.read_utf8()).collect()
    }

    /// Read a count-prefixed array of `i32`.
    pub fn read_i32_array(&mut self) -> ManifestResult<Vec<i32>> {
        let count = self.read_u16()? as usize;
        (0..count).map(|_| self.read_i32()).collect()
    }
}
