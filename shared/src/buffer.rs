//! Byte-level cursor used by every codec
//!
//! A [`ProtocolBuffer`] is a single-pass forward cursor: writes append to the
//! end of the byte vector, reads consume from the current position. Multi-byte
//! numbers are big-endian. Counts and string lengths use unsigned LEB128
//! variable-length integers capped at 32 bits.
//!
//! Codecs never rewind. Diagnostics that need to look at bytes without
//! consuming them use [`ProtocolBuffer::mark`] and [`ProtocolBuffer::reset`].

use crate::error::CodecError;
use std::fmt::Write as _;

const MAX_VARINT_BYTES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolBuffer {
    data: Vec<u8>,
    position: usize,
}

impl ProtocolBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps received bytes for reading from the start
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Saves the read cursor so it can be restored with [`reset`](Self::reset)
    pub fn mark(&self) -> usize {
        self.position
    }

    pub fn reset(&mut self, mark: usize) {
        self.position = mark.min(self.data.len());
    }

    /// Fails with [`CodecError::TrailingBytes`] unless every byte was consumed
    pub fn expect_end(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    /// Renders the unread bytes as hex without moving the cursor
    pub fn hex_dump(&mut self) -> String {
        let mark = self.mark();
        let mut out = String::with_capacity(self.remaining() * 3);
        while let Ok(byte) = self.read_u8() {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{:02x}", byte);
        }
        self.reset(mark);
        out
    }

    fn take(&mut self, count: usize) -> Result<&[u8], CodecError> {
        if self.remaining() < count {
            return Err(CodecError::UnexpectedEof {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        self.position += count;
        Ok(&self.data[start..self.position])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(self.take(N)?);
        Ok(bytes)
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_varint(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.write_u8(byte);
                return;
            }
            self.write_u8(byte | 0x80);
        }
    }

    /// Writes a collection length; lengths beyond `u32::MAX` cannot be framed
    pub fn write_length(&mut self, length: usize) -> Result<(), CodecError> {
        let length = u32::try_from(length).map_err(|_| CodecError::VarIntOverflow)?;
        self.write_varint(length);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_length(value.len())?;
        self.write_bytes(value.as_bytes());
        Ok(())
    }

    /// Consumes every unread byte
    pub fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.data[self.position..].to_vec();
        self.position = self.data.len();
        rest
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Strict boolean: anything other than 0 or 1 is rejected
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBoolean(other)),
        }
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn read_varint(&mut self) -> Result<u32, CodecError> {
        let mut result: u64 = 0;
        for index in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            result |= u64::from(byte & 0x7f) << (7 * index);
            if byte & 0x80 == 0 {
                return u32::try_from(result).map_err(|_| CodecError::VarIntOverflow);
            }
        }
        Err(CodecError::VarIntOverflow)
    }

    pub fn read_length(&mut self) -> Result<usize, CodecError> {
        Ok(self.read_varint()? as usize)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let length = self.read_length()?;
        let bytes = self.take(length)?.to_vec();
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }
}
