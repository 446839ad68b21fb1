//! Big-endian cursor over owned bytes.
//!
//! Everything in the cache wire format is big-endian: sector headers,
//! index entries, manifests, and the checksum table. [`Buffer`] is the
//! one place that knows how to pull those primitives out of a byte
//! sequence; every decoder above it works in terms of these reads.
//!
//! Reads never truncate — any read that would advance past the end of
//! the buffer fails with [`BufferError::Underrun`].

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Buffer underrun: requested {requested} bytes with {remaining} remaining")]
    Underrun { requested: usize, remaining: usize },
    #[error("String not terminated before end of buffer")]
    UnterminatedString,
    #[error("Seek to {pos} is beyond buffer length {len}")]
    SeekOutOfBounds { pos: usize, len: usize },
}

/// A cursored view over an owned byte sequence.
///
/// Reading advances the cursor; writing appends at the end of the
/// underlying storage and leaves the cursor untouched.
#[derive(Debug, Clone)]
pub struct Buffer {
    inner: Cursor<Vec<u8>>,
}

impl Buffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { inner: Cursor::new(data) }
    }

    /// An empty buffer with `capacity` bytes reserved, for writing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: Cursor::new(Vec::with_capacity(capacity)) }
    }

    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    pub fn as_slice(&self) -> &[u8] {
        self.inner.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }

    /// Move the read cursor. Seeking to the end (`pos == len`) is
    /// allowed; anything past it is an error.
    pub fn seek(&mut self, pos: usize) -> Result<(), BufferError> {
        if pos > self.len() {
            return Err(BufferError::SeekOutOfBounds { pos, len: self.len() });
        }
        self.inner.set_position(pos as u64);
        Ok(())
    }

    fn ensure(&self, requested: usize) -> Result<(), BufferError> {
        let remaining = self.remaining();
        if remaining < requested {
            return Err(BufferError::Underrun { requested, remaining });
        }
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.ensure(1)?;
        Ok(self.inner.read_u8().expect("length checked"))
    }

    pub fn read_i8(&mut self) -> Result<i8, BufferError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.ensure(2)?;
        Ok(self.inner.read_u16::<BigEndian>().expect("length checked"))
    }

    /// Three-byte big-endian integer, as used by index entries and
    /// sector links.
    pub fn read_u24(&mut self) -> Result<u32, BufferError> {
        self.ensure(3)?;
        Ok(self.inner.read_u24::<BigEndian>().expect("length checked"))
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.ensure(4)?;
        Ok(self.inner.read_u32::<BigEndian>().expect("length checked"))
    }

    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        self.ensure(4)?;
        Ok(self.inner.read_i32::<BigEndian>().expect("length checked"))
    }

    /// The sign bit of the next byte without advancing the cursor.
    pub fn peek_i8(&self) -> Result<i8, BufferError> {
        self.ensure(1)?;
        Ok(self.inner.get_ref()[self.position()] as i8)
    }

    /// Variable-width "smart" integer: two wire bytes when the first
    /// byte's top bit is clear, four otherwise (masked to 31 bits).
    pub fn read_smart(&mut self) -> Result<u32, BufferError> {
        if self.peek_i8()? >= 0 {
            Ok(u32::from(self.read_u16()?) & 0xFFFF)
        } else {
            Ok(self.read_u32()? & 0x7FFF_FFFF)
        }
    }

    /// A NUL-terminated string; the terminator is consumed and excluded
    /// from the result.
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let mut out = Vec::new();
        loop {
            if self.remaining() == 0 {
                return Err(BufferError::UnterminatedString);
            }
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            out.push(b);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Exactly `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, BufferError> {
        self.ensure(n)?;
        let start = self.position();
        let out = self.inner.get_ref()[start..start + n].to_vec();
        self.inner.set_position((start + n) as u64);
        Ok(out)
    }

    // ── Writes ───────────────────────────────────────────────────────────

    pub fn write_u8(&mut self, value: u8) {
        self.inner.get_mut().push(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        // Infallible: Vec<u8> as a Write sink cannot error.
        let _ = self.inner.get_mut().write_u32::<BigEndian>(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.get_mut().extend_from_slice(bytes);
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}
