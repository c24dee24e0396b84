//! Start section: format version and alignment.

use std::io::{Read, Write};

use crate::error::{AltError, Result};
use crate::magic::{Marker, ALT_ALIGNMENT, ALT_VERSION};
use crate::primitive::{AltReader, AltWriter};
use crate::section::{SectionCodec, SectionHeader};

/// Body of the Start section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRecord {
    /// Format version
    pub version: i32,
    /// Section alignment in bytes
    pub alignment: i32,
}

impl Default for StartRecord {
    fn default() -> Self {
        Self {
            version: ALT_VERSION,
            alignment: ALT_ALIGNMENT as i32,
        }
    }
}

impl SectionCodec for StartRecord {
    const MARKER: Marker = Marker::Start;

    fn size(&self) -> u64 {
        8
    }

    fn write_body<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        w.write_i32(self.version)?;
        w.write_i32(self.alignment)
    }

    fn read_body<R: Read>(r: &mut AltReader<R>, _header: &SectionHeader) -> Result<Self> {
        let version = r.read_i32()?;
        if version != ALT_VERSION {
            return Err(AltError::VersionUnsupported(version));
        }
        let alignment = r.read_i32()?;
        if alignment as i64 != ALT_ALIGNMENT as i64 {
            return Err(AltError::AlignmentUnsupported(alignment));
        }
        Ok(Self { version, alignment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(record: StartRecord) -> Vec<u8> {
        let mut w = AltWriter::new(Vec::new());
        record.write(&mut w).unwrap();
        w.into_inner()
    }

    #[test]
    fn test_start_round_trip() {
        let bytes = encode(StartRecord::default());
        assert_eq!(bytes.len(), 32);
        let record = StartRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap();
        assert_eq!(record, StartRecord::default());
    }

    #[test]
    fn test_version_rejected() {
        let bytes = encode(StartRecord { version: 3, ..Default::default() });
        let err = StartRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap_err();
        assert!(matches!(err, AltError::VersionUnsupported(3)));
    }

    #[test]
    fn test_alignment_rejected() {
        let bytes = encode(StartRecord { alignment: 64, ..Default::default() });
        let err = StartRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap_err();
        assert!(matches!(err, AltError::AlignmentUnsupported(64)));
    }
}
