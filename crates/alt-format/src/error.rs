//! Error types for the ALT codec
//!
//! Every variant aborts the surrounding section read or write. The codec
//! never recovers locally, retries, or substitutes a default.

use thiserror::Error;

use crate::magic::Marker;
use crate::quantization::DataType;

/// Result type alias for ALT codec operations
pub type Result<T> = std::result::Result<T, AltError>;

/// Main error type for the ALT codec
#[derive(Error, Debug)]
pub enum AltError {
    /// A marker position holds a value outside the registered set
    #[error("Unknown section marker: {0:#x}")]
    UnknownMarker(u64),

    /// A registered marker appeared where a different section was expected
    #[error("Wrong section: expected {expected}, found {found}")]
    WrongSection {
        /// Section the caller asked for
        expected: Marker,
        /// Section actually present in the stream
        found: Marker,
    },

    /// Declared body size disagrees with the bytes produced or consumed
    #[error("Section size mismatch in {section}: declared {declared} bytes, actual {actual}")]
    SizeMismatch {
        /// Section being encoded or decoded
        section: Marker,
        /// `body_size` from the header (or from `size()` when writing)
        declared: u64,
        /// Bytes actually produced or consumed
        actual: u64,
    },

    /// Alignment padding contains a non-zero byte
    #[error("Alignment padding corrupted at offset {offset}")]
    PaddingCorruption {
        /// Absolute offset of the first non-zero padding byte
        offset: u64,
    },

    /// A stored value disagrees with its recomputation from other fields
    #[error("Derived field mismatch for {field}: stored {stored}, derived {derived}")]
    DerivedFieldMismatch {
        /// Field name
        field: &'static str,
        /// Value read from the stream
        stored: i64,
        /// Value recomputed from the other fields
        derived: i64,
    },

    /// Tensor data type tag not known to this codec version
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(i32),

    /// Packing flag inconsistent with the tensor data type
    #[error("Invalid packing flag {flag} for data type {data_type:?}")]
    InvalidPacking {
        /// Tensor data type
        data_type: DataType,
        /// Packing flag requested or read
        flag: u8,
    },

    /// Length-prefixed string is not valid UTF-8
    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Absolute offset of the string bytes
        offset: u64,
    },

    /// Start section carries an unsupported format version
    #[error("Unsupported ALT format version: {0}")]
    VersionUnsupported(i32),

    /// Start section carries an unsupported alignment
    #[error("Unsupported ALT alignment: {0}")]
    AlignmentUnsupported(i32),

    /// A numeric field is outside its domain (negative length, unknown enum tag)
    #[error("Invalid value for {field}: {value}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending value
        value: i64,
    },

    /// Container operations called out of order
    #[error("Invalid container state: {0}")]
    InvalidState(String),

    /// Tensor input that cannot be encoded (shape/data disagreement, non-finite values)
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// Configuration mapping errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors, including truncated input
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AltError {
    fn from(err: serde_json::Error) -> Self {
        AltError::Config(err.to_string())
    }
}

impl AltError {
    /// True when the error means the bytes on disk are malformed, as opposed
    /// to a caller mistake or an IO failure.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            AltError::UnknownMarker(_)
                | AltError::WrongSection { .. }
                | AltError::SizeMismatch { .. }
                | AltError::PaddingCorruption { .. }
                | AltError::DerivedFieldMismatch { .. }
                | AltError::UnsupportedDataType(_)
                | AltError::InvalidPacking { .. }
                | AltError::InvalidUtf8 { .. }
                | AltError::VersionUnsupported(_)
                | AltError::AlignmentUnsupported(_)
                | AltError::InvalidField { .. }
        )
    }
}
