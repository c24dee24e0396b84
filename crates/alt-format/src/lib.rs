//! # alt-format - ALT Model Container Codec
//!
//! Reads and writes ALT files: a sectioned, 32-byte aligned, little-endian
//! container holding a decoder-only transformer's identity metadata,
//! hyperparameters, vocabulary and (optionally) weights.
//!
//! ## File Layout
//!
//! | Section    | Marker       | Contents                                |
//! |------------|--------------|-----------------------------------------|
//! | Start      | `0x616C7400` | format version, alignment               |
//! | General    | `0xCAFEBABE` | model type, base model, author, uuid... |
//! | Parameters | `0xDEADBEEF` | hidden size, heads, layers, rope...     |
//! | Tokenizer  | `0xBADDCAFE` | special ids, pieces with score and type |
//! | Tensors    | `0xFACEFEED` | optional; classified, quantized weights |
//! | End        | `0x0FFFFFFF` | bare terminator                         |
//!
//! Sections must appear in exactly this order. Every section except End is
//! `marker | body_size | body | zero padding`, and derived fields (head size,
//! tensor counts, tensor classification) are recomputed and checked on read.
//!
//! ## Example
//!
//! ```rust,ignore
//! use alt_format::{Container, GeneralRecord, ModelConfig, ParametersRecord,
//!                  TokenizerRecord, Vocabulary};
//!
//! let config = ModelConfig::from_file("config.json")?;
//! let vocab = Vocabulary::from_file("vocab.json")?;
//!
//! let container = Container::new(
//!     GeneralRecord::new("mistral"),
//!     ParametersRecord::from_config(&config)?,
//!     TokenizerRecord::from_source(&vocab)?,
//! );
//! container.save("model.alt")?;
//!
//! let loaded = Container::load("model.alt")?;
//! assert_eq!(loaded, container);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod error;
pub mod general;
pub mod magic;
pub mod parameters;
pub mod primitive;
pub mod quantization;
pub mod section;
pub mod start;
pub mod tensors;
pub mod tokenizer;

pub use container::{Container, ContainerReader, ContainerState, ContainerWriter};
pub use error::{AltError, Result};
pub use general::GeneralRecord;
pub use magic::{padding_for, section_padding, Marker, ALT_ALIGNMENT, ALT_VERSION};
pub use parameters::{ModelConfig, ParametersRecord};
pub use primitive::{AltReader, AltWriter};
pub use quantization::{DataType, QuantParams, QuantProfile, QuantizedScalar};
pub use section::{SectionCodec, SectionHeader};
pub use start::StartRecord;
pub use tensors::{
    classify, ComponentType, LayerType, ProjectionType, TensorClass, TensorInput, TensorRecord,
    TensorsOptions, TensorsRecord,
};
pub use tokenizer::{
    classify_token, TokenEntry, TokenSource, TokenType, TokenizerRecord, VocabEntry, Vocabulary,
};
