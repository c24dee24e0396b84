//! Primitive field codec.
//!
//! [`AltWriter`] and [`AltReader`] wrap the container stream for the whole
//! lifetime of a read or write and track the absolute byte offset, which is
//! what alignment padding is computed from. Fields are little-endian:
//!
//! | Kind   | Encoding                                   |
//! |--------|--------------------------------------------|
//! | i32    | 4 bytes                                    |
//! | i64    | 8 bytes                                    |
//! | u64    | 8 bytes (markers, section sizes)           |
//! | f32    | 4 bytes IEEE-754                           |
//! | u8     | 1 byte (flags)                             |
//! | bool   | 1 byte, 0 or 1                             |
//! | string | i32 byte length + raw UTF-8, no terminator |

use std::io::{Read, Write};

use crate::error::{AltError, Result};
use crate::magic::{section_padding, Marker};

/// Encoded size of a length-prefixed string.
pub fn string_size(value: &str) -> u64 {
    4 + value.len() as u64
}

// ============================================================================
// Writer
// ============================================================================

/// Little-endian field writer with offset tracking.
pub struct AltWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> AltWriter<W> {
    /// Wrap a stream positioned at offset 0 of the container.
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    /// Absolute offset of the next byte to be written.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Write a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Write a signed 32-bit integer.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a signed 64-bit integer.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write an unsigned 64-bit integer.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a 32-bit float.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = i32::try_from(value.len()).map_err(|_| AltError::InvalidField {
            field: "string length",
            value: value.len() as i64,
        })?;
        self.write_i32(len)?;
        self.write_bytes(value.as_bytes())
    }

    /// Write zero bytes up to the next section boundary. Returns the pad length.
    pub fn write_padding(&mut self) -> Result<u64> {
        const ZEROS: [u8; 32] = [0u8; 32];
        let padding = section_padding(self.position);
        self.write_bytes(&ZEROS[..padding as usize])?;
        Ok(padding)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Largest buffer reserved before any bytes have arrived.
const MAX_PREALLOC: u64 = 64 * 1024;

/// Largest record count reserved up front for a decoded list.
pub(crate) const MAX_PREALLOC_ITEMS: u64 = 4096;

/// Capacity for `declared` records that fit `body_room` bytes.
pub(crate) fn record_capacity(declared: u64, body_room: u64, min_record: u64) -> usize {
    declared.min(body_room / min_record).min(MAX_PREALLOC_ITEMS) as usize
}

/// Bounds of the section body currently being decoded.
#[derive(Debug, Clone, Copy)]
struct SectionLimit {
    marker: Marker,
    start: u64,
    body_size: u64,
}

impl SectionLimit {
    fn end(&self) -> u64 {
        self.start.saturating_add(self.body_size)
    }
}

/// Little-endian field reader with offset tracking.
///
/// While a section body is open (see [`AltReader::begin_section`]) every read
/// is checked against the declared body size, so a corrupt length prefix
/// fails with `SizeMismatch` before anything is allocated for it.
pub struct AltReader<R: Read> {
    inner: R,
    position: u64,
    limit: Option<SectionLimit>,
}

impl<R: Read> AltReader<R> {
    /// Wrap a stream positioned at offset 0 of the container.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            position: 0,
            limit: None,
        }
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Open a section body of `body_size` bytes starting at the current offset.
    pub fn begin_section(&mut self, marker: Marker, body_size: u64) {
        self.limit = Some(SectionLimit {
            marker,
            start: self.position,
            body_size,
        });
    }

    /// Close the current section body and return the bytes consumed in it.
    pub fn end_section(&mut self) -> u64 {
        match self.limit.take() {
            Some(limit) => self.position - limit.start,
            None => 0,
        }
    }

    /// Bytes left in the open section body, if any.
    pub fn remaining_in_section(&self) -> Option<u64> {
        self.limit
            .map(|limit| limit.end().saturating_sub(self.position))
    }

    fn ensure_available(&self, len: u64) -> Result<()> {
        if let Some(limit) = self.limit {
            let wanted = self.position.saturating_add(len);
            if wanted > limit.end() {
                return Err(AltError::SizeMismatch {
                    section: limit.marker,
                    declared: limit.body_size,
                    actual: wanted - limit.start,
                });
            }
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure_available(N as u64)?;
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        self.position += N as u64;
        Ok(buf)
    }

    /// Read exactly `len` raw bytes.
    ///
    /// The buffer grows with the bytes actually delivered, so a length that
    /// exceeds the remaining input ends in `UnexpectedEof` rather than a
    /// huge up-front allocation.
    pub fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        self.ensure_available(len)?;
        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC) as usize);
        let read = (&mut self.inner).take(len).read_to_end(&mut buf)? as u64;
        self.position += read;
        if read != len {
            return Err(AltError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes, input ended after {read}"),
            )));
        }
        Ok(buf)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a one-byte boolean; anything other than 0 or 1 is rejected.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AltError::InvalidField {
                field: "bool",
                value: other as i64,
            }),
        }
    }

    /// Read a signed 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    /// Read a signed 64-bit integer.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Read an unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read a 32-bit float.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Read an `i32` that must be non-negative.
    pub fn read_count(&mut self, field: &'static str) -> Result<u32> {
        let value = self.read_i32()?;
        u32::try_from(value).map_err(|_| AltError::InvalidField {
            field,
            value: value as i64,
        })
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_count("string length")?;
        let offset = self.position;
        let bytes = self.read_bytes(len as u64)?;
        String::from_utf8(bytes).map_err(|_| AltError::InvalidUtf8 { offset })
    }

    /// Consume the padding up to the next section boundary and verify it is
    /// all zero. Returns the pad length.
    pub fn read_padding(&mut self) -> Result<u64> {
        let padding = section_padding(self.position);
        let start = self.position;
        let bytes = self.read_bytes(padding)?;
        if let Some(index) = bytes.iter().position(|&b| b != 0) {
            return Err(AltError::PaddingCorruption {
                offset: start + index as u64,
            });
        }
        Ok(padding)
    }
}
