//! Parameters section: architecture hyperparameters.
//!
//! [`ModelConfig`] mirrors a HuggingFace `config.json`; every field is
//! optional and [`ParametersRecord::from_config`] applies the defaults.

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AltError, Result};
use crate::magic::Marker;
use crate::primitive::{string_size, AltReader, AltWriter};
use crate::section::{SectionCodec, SectionHeader};

/// Model configuration as found in `config.json`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Architecture family
    #[serde(default)]
    pub model_type: Option<String>,
    /// Activation function name
    #[serde(default)]
    pub hidden_act: Option<String>,
    /// Whether lm_head shares the embedding matrix
    #[serde(default)]
    pub tie_word_embeddings: Option<bool>,
    /// Model dimension
    #[serde(default)]
    pub hidden_size: Option<i32>,
    /// MLP inner dimension
    #[serde(default)]
    pub intermediate_size: Option<i32>,
    /// Maximum sequence length
    #[serde(default)]
    pub max_position_embeddings: Option<i32>,
    /// Query heads
    #[serde(default)]
    pub num_attention_heads: Option<i32>,
    /// Transformer blocks
    #[serde(default)]
    pub num_hidden_layers: Option<i32>,
    /// Key/value heads (GQA)
    #[serde(default)]
    pub num_key_value_heads: Option<i32>,
    /// Attention window; `null` falls back to the default
    #[serde(default)]
    pub sliding_window: Option<i32>,
    /// RMSNorm epsilon
    #[serde(default)]
    pub rms_norm_eps: Option<f32>,
    /// RoPE base frequency
    #[serde(default)]
    pub rope_theta: Option<f32>,
    /// Weight init standard deviation
    #[serde(default)]
    pub initializer_range: Option<f32>,
}

impl ModelConfig {
    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a `config.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Body of the Parameters section.
///
/// `head_size` is written to the wire but has no struct field. The writer
/// derives it from `hidden_size / num_attention_heads`; the reader rejects
/// a stored value that disagrees with that derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersRecord {
    /// Activation function name
    pub hidden_act: String,
    /// Whether lm_head shares the embedding matrix
    pub tie_word_embeddings: bool,
    /// Model dimension
    pub hidden_size: i32,
    /// MLP inner dimension
    pub intermediate_size: i32,
    /// Maximum sequence length
    pub max_position_embeddings: i32,
    /// Query heads
    pub num_attention_heads: i32,
    /// Transformer blocks
    pub num_hidden_layers: i32,
    /// Key/value heads
    pub num_key_value_heads: i32,
    /// Attention window in tokens
    pub sliding_window: i32,
    /// RMSNorm epsilon
    pub rms_norm_eps: f32,
    /// RoPE base frequency
    pub rope_theta: f32,
    /// Weight init standard deviation
    pub initializer_range: f32,
}

impl Default for ParametersRecord {
    fn default() -> Self {
        Self {
            hidden_act: "silu".to_string(),
            tie_word_embeddings: false,
            hidden_size: 4096,
            intermediate_size: 4 * 4096,
            max_position_embeddings: 32768,
            num_attention_heads: 32,
            num_hidden_layers: 32,
            num_key_value_heads: 32,
            sliding_window: 4096,
            rms_norm_eps: 1e-5,
            rope_theta: 10000.0,
            initializer_range: 0.02,
        }
    }
}

/// Integer fields after `tie_word_embeddings`, including `head_size`.
const INT_FIELDS: u64 = 8;
const FLOAT_FIELDS: u64 = 3;

impl ParametersRecord {
    /// Build from a config, filling absent fields with defaults.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let hidden_size = config.hidden_size.unwrap_or(4096);
        let num_attention_heads = config.num_attention_heads.unwrap_or(32);
        if num_attention_heads <= 0 {
            return Err(AltError::Config(format!(
                "num_attention_heads must be positive, got {num_attention_heads}"
            )));
        }
        if hidden_size <= 0 {
            return Err(AltError::Config(format!(
                "hidden_size must be positive, got {hidden_size}"
            )));
        }

        Ok(Self {
            hidden_act: config.hidden_act.clone().unwrap_or_else(|| "silu".to_string()),
            tie_word_embeddings: config.tie_word_embeddings.unwrap_or(false),
            hidden_size,
            intermediate_size: config
                .intermediate_size
                .unwrap_or_else(|| hidden_size.saturating_mul(4)),
            max_position_embeddings: config.max_position_embeddings.unwrap_or(32768),
            num_attention_heads,
            num_hidden_layers: config.num_hidden_layers.unwrap_or(32),
            num_key_value_heads: config.num_key_value_heads.unwrap_or(num_attention_heads),
            sliding_window: config.sliding_window.unwrap_or(4096),
            rms_norm_eps: config.rms_norm_eps.unwrap_or(1e-5),
            rope_theta: config.rope_theta.unwrap_or(10000.0),
            initializer_range: config.initializer_range.unwrap_or(0.02),
        })
    }

    /// Per-head dimension, `hidden_size / num_attention_heads` (integer division).
    pub fn head_size(&self) -> Result<i32> {
        if self.num_attention_heads <= 0 {
            return Err(AltError::InvalidField {
                field: "num_attention_heads",
                value: self.num_attention_heads as i64,
            });
        }
        Ok(self.hidden_size / self.num_attention_heads)
    }

    /// Query heads sharing one key/value head.
    pub fn gqa_ratio(&self) -> Option<i32> {
        if self.num_key_value_heads > 0 {
            Some(self.num_attention_heads / self.num_key_value_heads)
        } else {
            None
        }
    }
}

impl SectionCodec for ParametersRecord {
    const MARKER: Marker = Marker::Parameters;

    fn size(&self) -> u64 {
        string_size(&self.hidden_act) + 1 + 4 * INT_FIELDS + 4 * FLOAT_FIELDS
    }

    fn write_body<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        let head_size = self.head_size()?;
        w.write_string(&self.hidden_act)?;
        w.write_bool(self.tie_word_embeddings)?;
        w.write_i32(self.hidden_size)?;
        w.write_i32(self.intermediate_size)?;
        w.write_i32(self.max_position_embeddings)?;
        w.write_i32(self.num_attention_heads)?;
        w.write_i32(self.num_hidden_layers)?;
        w.write_i32(self.num_key_value_heads)?;
        w.write_i32(self.sliding_window)?;
        w.write_i32(head_size)?;
        w.write_f32(self.rms_norm_eps)?;
        w.write_f32(self.rope_theta)?;
        w.write_f32(self.initializer_range)
    }

    fn read_body<R: Read>(r: &mut AltReader<R>, _header: &SectionHeader) -> Result<Self> {
        let hidden_act = r.read_string()?;
        let tie_word_embeddings = r.read_bool()?;
        let hidden_size = r.read_i32()?;
        let intermediate_size = r.read_i32()?;
        let max_position_embeddings = r.read_i32()?;
        let num_attention_heads = r.read_i32()?;
        let num_hidden_layers = r.read_i32()?;
        let num_key_value_heads = r.read_i32()?;
        let sliding_window = r.read_i32()?;
        let stored_head_size = r.read_i32()?;

        let record = Self {
            hidden_act,
            tie_word_embeddings,
            hidden_size,
            intermediate_size,
            max_position_embeddings,
            num_attention_heads,
            num_hidden_layers,
            num_key_value_heads,
            sliding_window,
            rms_norm_eps: r.read_f32()?,
            rope_theta: r.read_f32()?,
            initializer_range: r.read_f32()?,
        };

        let derived = record.head_size()?;
        if stored_head_size != derived {
            return Err(AltError::DerivedFieldMismatch {
                field: "head_size",
                stored: stored_head_size as i64,
                derived: derived as i64,
            });
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(record: &ParametersRecord) -> Vec<u8> {
        let mut w = AltWriter::new(Vec::new());
        record.write(&mut w).unwrap();
        w.into_inner()
    }

    fn small() -> ParametersRecord {
        ParametersRecord {
            hidden_size: 128,
            intermediate_size: 512,
            num_attention_heads: 4,
            num_key_value_heads: 2,
            num_hidden_layers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_from_empty_config() {
        let record = ParametersRecord::from_config(&ModelConfig::default()).unwrap();
        assert_eq!(record, ParametersRecord::default());
        assert_eq!(record.head_size().unwrap(), 128);
    }

    #[test]
    fn test_config_dependent_defaults() {
        let config = ModelConfig::from_json(
            r#"{"hidden_size": 1024, "num_attention_heads": 8, "sliding_window": null, "vocab_size": 32000}"#,
        )
        .unwrap();
        let record = ParametersRecord::from_config(&config).unwrap();
        assert_eq!(record.intermediate_size, 4096);
        assert_eq!(record.num_key_value_heads, 8);
        assert_eq!(record.sliding_window, 4096);
        assert_eq!(record.head_size().unwrap(), 128);
    }

    #[test]
    fn test_zero_heads_is_config_error() {
        let config = ModelConfig {
            num_attention_heads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ParametersRecord::from_config(&config),
            Err(AltError::Config(_))
        ));
    }

    #[test]
    fn test_size_matches_field_layout() {
        let record = ParametersRecord::default();
        // "silu": 4 + 4, bool: 1, 8 ints, 3 floats
        assert_eq!(record.size(), 8 + 1 + 32 + 12);
    }

    #[test]
    fn test_parameters_round_trip() {
        let record = small();
        let bytes = encode(&record);
        let decoded = ParametersRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.head_size().unwrap(), 32);
        assert_eq!(decoded.gqa_ratio(), Some(2));
    }

    #[test]
    fn test_head_size_mismatch_rejected() {
        let mut bytes = encode(&small());
        // header 16, "silu" 8, bool 1, seven ints 28
        let head_size_at = 16 + 8 + 1 + 28;
        assert_eq!(&bytes[head_size_at..head_size_at + 4], &32i32.to_le_bytes());
        bytes[head_size_at..head_size_at + 4].copy_from_slice(&31i32.to_le_bytes());

        let err = ParametersRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap_err();
        assert!(matches!(
            err,
            AltError::DerivedFieldMismatch {
                field: "head_size",
                stored: 31,
                derived: 32
            }
        ));
    }

    #[test]
    fn test_zero_heads_rejected_on_read() {
        let mut bytes = encode(&small());
        let heads_at = 16 + 8 + 1 + 12;
        bytes[heads_at..heads_at + 4].copy_from_slice(&0i32.to_le_bytes());
        let err = ParametersRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap_err();
        assert!(matches!(
            err,
            AltError::InvalidField {
                field: "num_attention_heads",
                ..
            }
        ));
    }
}
