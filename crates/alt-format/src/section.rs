//! Section framing.
//!
//! Every section except End is `marker (u64) | body_size (u64) | body | pad`.
//! [`SectionCodec`] is implemented once per section kind; its provided
//! `write`/`read` methods own the framing so the per-section code only deals
//! with body fields.

use std::io::{Read, Write};

use tracing::debug;

use crate::error::{AltError, Result};
use crate::magic::{Marker, SECTION_HEADER_SIZE};
use crate::primitive::{AltReader, AltWriter};

/// Decoded section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section kind
    pub marker: Marker,
    /// Body length in bytes, excluding header and padding
    pub body_size: u64,
    /// Absolute offset of the first body byte
    pub body_offset: u64,
}

/// Write a section header.
pub fn write_header<W: Write>(w: &mut AltWriter<W>, marker: Marker, body_size: u64) -> Result<()> {
    w.write_u64(marker.value())?;
    w.write_u64(body_size)
}

/// Read a raw marker and map it onto the registered set.
pub fn read_marker<R: Read>(r: &mut AltReader<R>) -> Result<Marker> {
    let raw = r.read_u64()?;
    Marker::try_from(raw)
}

/// Read the size field of a section whose marker was already consumed.
/// `marker` must not be End, which carries no size.
pub fn read_size_after<R: Read>(r: &mut AltReader<R>, marker: Marker) -> Result<SectionHeader> {
    debug_assert!(marker != Marker::End);
    let body_size = r.read_u64()?;
    Ok(SectionHeader {
        marker,
        body_size,
        body_offset: r.position(),
    })
}

/// Read a full section header and require `expected`.
pub fn read_header<R: Read>(r: &mut AltReader<R>, expected: Marker) -> Result<SectionHeader> {
    let found = read_marker(r)?;
    if found != expected {
        return Err(AltError::WrongSection { expected, found });
    }
    read_size_after(r, found)
}

/// Write the bare End marker.
pub fn write_end_marker<W: Write>(w: &mut AltWriter<W>) -> Result<()> {
    debug!(offset = w.position(), "writing End marker");
    w.write_u64(Marker::End.value())
}

/// Read the bare End marker.
pub fn read_end_marker<R: Read>(r: &mut AltReader<R>) -> Result<()> {
    let found = read_marker(r)?;
    if found != Marker::End {
        return Err(AltError::WrongSection {
            expected: Marker::End,
            found,
        });
    }
    Ok(())
}

/// Encoding and decoding of one section kind.
pub trait SectionCodec: Sized {
    /// Marker identifying this section.
    const MARKER: Marker;

    /// Exact body size in bytes, computed before anything is written.
    fn size(&self) -> u64;

    /// Write the body fields.
    fn write_body<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()>;

    /// Read the body fields. Reads are bounded by `header.body_size`.
    fn read_body<R: Read>(r: &mut AltReader<R>, header: &SectionHeader) -> Result<Self>;

    /// Write header, body and padding. Returns the total bytes emitted.
    fn write<W: Write>(&self, w: &mut AltWriter<W>) -> Result<u64> {
        let start = w.position();
        let declared = self.size();
        write_header(w, Self::MARKER, declared)?;

        let body_start = w.position();
        self.write_body(w)?;
        let actual = w.position() - body_start;
        if actual != declared {
            return Err(AltError::SizeMismatch {
                section: Self::MARKER,
                declared,
                actual,
            });
        }

        let padding = w.write_padding()?;
        debug!(
            section = Self::MARKER.name(),
            offset = start,
            body_size = declared,
            padding,
            "wrote section"
        );
        Ok(w.position() - start)
    }

    /// Read a section, requiring its marker to be `Self::MARKER`.
    fn read<R: Read>(r: &mut AltReader<R>) -> Result<Self> {
        let found = read_marker(r)?;
        if found != Self::MARKER {
            return Err(AltError::WrongSection {
                expected: Self::MARKER,
                found,
            });
        }
        Self::read_framed(r)
    }

    /// Read size, body and padding of a section whose marker was already
    /// consumed and matched.
    fn read_framed<R: Read>(r: &mut AltReader<R>) -> Result<Self> {
        let header = read_size_after(r, Self::MARKER)?;
        let offset = header.body_offset - SECTION_HEADER_SIZE;

        r.begin_section(Self::MARKER, header.body_size);
        let body = Self::read_body(r, &header);
        let consumed = r.end_section();
        let value = body?;

        if consumed != header.body_size {
            return Err(AltError::SizeMismatch {
                section: Self::MARKER,
                declared: header.body_size,
                actual: consumed,
            });
        }

        let padding = r.read_padding()?;
        debug!(
            section = Self::MARKER.name(),
            offset,
            body_size = header.body_size,
            padding,
            "read section"
        );
        Ok(value)
    }
}
