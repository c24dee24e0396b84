//! Section markers, format constants and alignment arithmetic.
//!
//! ```text
//! offset  field
//! 0       Start       marker | size | version, alignment | pad
//! 32      General     marker | size | strings...         | pad
//! aligned Parameters  marker | size | fields...          | pad
//! aligned Tokenizer   marker | size | meta, tokens...    | pad
//! aligned Tensors     marker | size | meta, records...   | pad   (optional)
//! aligned End         marker                                     (no size, no pad)
//! ```
//!
//! All multi-byte values are little-endian.

use std::fmt;

use crate::error::{AltError, Result};

/// Current ALT format version written to (and required in) the Start section.
pub const ALT_VERSION: i32 = 2;

/// Section alignment in bytes.
pub const ALT_ALIGNMENT: u64 = 32;

/// Size of a section header: 8-byte marker + 8-byte body size.
pub const SECTION_HEADER_SIZE: u64 = 16;

/// Size of the bare End marker.
pub const END_MARKER_SIZE: u64 = 8;

/// Identifies the kind of section at a marker position.
///
/// Variants are listed in the order they appear in a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u64)]
pub enum Marker {
    /// File magic, "alt".
    Start = 0x616C_7400,
    /// Model identity strings.
    General = 0xCAFE_BABE,
    /// Architecture hyperparameters.
    Parameters = 0xDEAD_BEEF,
    /// Vocabulary and special token ids.
    Tokenizer = 0xBADD_CAFE,
    /// Tensor metadata and payloads.
    Tensors = 0xFACE_FEED,
    /// Bare terminator; no size field, no padding.
    End = 0x0FFF_FFFF,
}

impl Marker {
    /// Every registered marker in file order.
    pub const ALL: [Marker; 6] = [
        Marker::Start,
        Marker::General,
        Marker::Parameters,
        Marker::Tokenizer,
        Marker::Tensors,
        Marker::End,
    ];

    /// Raw 64-bit value.
    pub fn value(self) -> u64 {
        self as u64
    }

    /// Human-readable section name.
    pub fn name(self) -> &'static str {
        match self {
            Marker::Start => "Start",
            Marker::General => "General",
            Marker::Parameters => "Parameters",
            Marker::Tokenizer => "Tokenizer",
            Marker::Tensors => "Tensors",
            Marker::End => "End",
        }
    }

    /// Check whether a raw value is one of the registered markers.
    pub fn is_valid(value: u64) -> bool {
        Marker::try_from(value).is_ok()
    }
}

impl TryFrom<u64> for Marker {
    type Error = AltError;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0x616C_7400 => Ok(Self::Start),
            0xCAFE_BABE => Ok(Self::General),
            0xDEAD_BEEF => Ok(Self::Parameters),
            0xBADD_CAFE => Ok(Self::Tokenizer),
            0xFACE_FEED => Ok(Self::Tensors),
            0x0FFF_FFFF => Ok(Self::End),
            other => Err(AltError::UnknownMarker(other)),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.name(), self.value())
    }
}

/// Number of zero bytes needed after `offset` to reach the next multiple of
/// `alignment`. Always in `[0, alignment)`.
///
/// A section ending at byte 68 needs `(32 - 68 % 32) % 32 = 28` bytes.
pub fn padding_for(offset: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0, "alignment must be non-zero");
    (alignment - (offset % alignment)) % alignment
}

/// Padding needed at `offset` under the format alignment.
pub fn section_padding(offset: u64) -> u64 {
    padding_for(offset, ALT_ALIGNMENT)
}
