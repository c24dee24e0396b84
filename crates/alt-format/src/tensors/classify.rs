//! Tensor-name classification.
//!
//! Names follow the HuggingFace decoder layout:
//!
//! ```text
//! model.embed_tokens.weight                       EmbedTokens  (-1)
//! model.layers.{i}.self_attn.{q,k,v,o}_proj.weight Layers      (i)
//! model.layers.{i}.mlp.{gate,up,down}_proj.weight  Layers      (i)
//! model.layers.{i}.input_layernorm.weight          Layers      (i)
//! model.layers.{i}.post_attention_layernorm.weight Layers      (i)
//! model.norm.weight                               Norm         (-3)
//! lm_head.weight                                  LmHead       (-2)
//! ```
//!
//! The leading `model.` is optional. Anything else is `Other` (-4).

use serde::{Deserialize, Serialize};

use crate::error::{AltError, Result};

/// Top-level model component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum ComponentType {
    /// Repeated transformer block
    Layers = 0,
    /// Token embedding matrix
    EmbedTokens = 1,
    /// Output projection
    LmHead = 2,
    /// Final normalization
    Norm = 3,
    /// Anything unrecognised
    Other = 4,
}

impl ComponentType {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Block index used for singleton components; `None` for `Layers`.
    pub fn sentinel_block(self) -> Option<i32> {
        match self {
            ComponentType::Layers => None,
            ComponentType::EmbedTokens => Some(-1),
            ComponentType::LmHead => Some(-2),
            ComponentType::Norm => Some(-3),
            ComponentType::Other => Some(-4),
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            ComponentType::Layers => "layers",
            ComponentType::EmbedTokens => "embed_tokens",
            ComponentType::LmHead => "lm_head",
            ComponentType::Norm => "norm",
            ComponentType::Other => "other",
        }
    }
}

impl TryFrom<i32> for ComponentType {
    type Error = AltError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(ComponentType::Layers),
            1 => Ok(ComponentType::EmbedTokens),
            2 => Ok(ComponentType::LmHead),
            3 => Ok(ComponentType::Norm),
            4 => Ok(ComponentType::Other),
            other => Err(AltError::InvalidField {
                field: "component_type",
                value: other as i64,
            }),
        }
    }
}

/// Sub-module of a transformer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum LayerType {
    /// Not inside a block, or unrecognised
    None = 0,
    /// Attention
    SelfAttn = 1,
    /// Feed-forward
    Mlp = 2,
    /// Pre-attention norm
    InputLayernorm = 3,
    /// Pre-MLP norm
    PostAttentionLayernorm = 4,
}

impl LayerType {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for LayerType {
    type Error = AltError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(LayerType::None),
            1 => Ok(LayerType::SelfAttn),
            2 => Ok(LayerType::Mlp),
            3 => Ok(LayerType::InputLayernorm),
            4 => Ok(LayerType::PostAttentionLayernorm),
            other => Err(AltError::InvalidField {
                field: "layer_type",
                value: other as i64,
            }),
        }
    }
}

/// Linear projection inside an attention or MLP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ProjectionType {
    /// No projection
    None = 0,
    /// Query
    QProj = 1,
    /// Key
    KProj = 2,
    /// Value
    VProj = 3,
    /// Attention output
    OProj = 4,
    /// MLP gate
    GateProj = 5,
    /// MLP up
    UpProj = 6,
    /// MLP down
    DownProj = 7,
}

impl ProjectionType {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for ProjectionType {
    type Error = AltError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(ProjectionType::None),
            1 => Ok(ProjectionType::QProj),
            2 => Ok(ProjectionType::KProj),
            3 => Ok(ProjectionType::VProj),
            4 => Ok(ProjectionType::OProj),
            5 => Ok(ProjectionType::GateProj),
            6 => Ok(ProjectionType::UpProj),
            7 => Ok(ProjectionType::DownProj),
            other => Err(AltError::InvalidField {
                field: "projection_type",
                value: other as i64,
            }),
        }
    }
}

/// Result of classifying a tensor name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorClass {
    /// Tensor inside block `block`
    Layered {
        /// Block index, `>= 0`
        block: i32,
        /// Sub-module
        layer_type: LayerType,
        /// Projection within the sub-module
        projection: ProjectionType,
    },
    /// Token embedding
    EmbedTokens,
    /// Output head
    LmHead,
    /// Final norm
    Norm,
    /// Unrecognised
    Other,
}

impl TensorClass {
    /// Component on the wire.
    pub fn component_type(&self) -> ComponentType {
        match self {
            TensorClass::Layered { .. } => ComponentType::Layers,
            TensorClass::EmbedTokens => ComponentType::EmbedTokens,
            TensorClass::LmHead => ComponentType::LmHead,
            TensorClass::Norm => ComponentType::Norm,
            TensorClass::Other => ComponentType::Other,
        }
    }

    /// Block index on the wire; negative sentinels for singletons.
    pub fn block_index(&self) -> i32 {
        match self {
            TensorClass::Layered { block, .. } => *block,
            other => other.component_type().sentinel_block().unwrap_or(-4),
        }
    }

    /// Layer type on the wire.
    pub fn layer_type(&self) -> LayerType {
        match self {
            TensorClass::Layered { layer_type, .. } => *layer_type,
            _ => LayerType::None,
        }
    }

    /// Projection type on the wire.
    pub fn projection_type(&self) -> ProjectionType {
        match self {
            TensorClass::Layered { projection, .. } => *projection,
            _ => ProjectionType::None,
        }
    }
}

/// Singleton components, matched against the first path segment.
const COMPONENT_RULES: &[(&str, TensorClass)] = &[
    ("embed_tokens", TensorClass::EmbedTokens),
    ("lm_head", TensorClass::LmHead),
    ("norm", TensorClass::Norm),
];

/// Sub-modules, matched against the segment after the block index.
const LAYER_RULES: &[(&str, LayerType)] = &[
    ("self_attn", LayerType::SelfAttn),
    ("mlp", LayerType::Mlp),
    ("input_layernorm", LayerType::InputLayernorm),
    ("post_attention_layernorm", LayerType::PostAttentionLayernorm),
];

/// Projections, matched against the segment after the sub-module.
const PROJECTION_RULES: &[(&str, ProjectionType)] = &[
    ("q_proj", ProjectionType::QProj),
    ("k_proj", ProjectionType::KProj),
    ("v_proj", ProjectionType::VProj),
    ("o_proj", ProjectionType::OProj),
    ("gate_proj", ProjectionType::GateProj),
    ("up_proj", ProjectionType::UpProj),
    ("down_proj", ProjectionType::DownProj),
];

fn lookup<T: Copy>(rules: &[(&str, T)], segment: Option<&str>) -> Option<T> {
    let segment = segment?;
    rules
        .iter()
        .find(|(key, _)| *key == segment)
        .map(|(_, value)| *value)
}

/// Classify a tensor by name.
pub fn classify(name: &str) -> TensorClass {
    let path = name.strip_prefix("model.").unwrap_or(name);
    let mut segments = path.split('.');
    let head = segments.next();

    if head == Some("layers") {
        if let Some(block) = segments
            .next()
            .and_then(|s| s.parse::<i32>().ok())
            .filter(|b| *b >= 0)
        {
            let layer_type = lookup(LAYER_RULES, segments.next()).unwrap_or(LayerType::None);
            let projection = match layer_type {
                LayerType::SelfAttn | LayerType::Mlp => {
                    lookup(PROJECTION_RULES, segments.next()).unwrap_or(ProjectionType::None)
                }
                _ => ProjectionType::None,
            };
            return TensorClass::Layered {
                block,
                layer_type,
                projection,
            };
        }
        return TensorClass::Other;
    }

    lookup(COMPONENT_RULES, head).unwrap_or(TensorClass::Other)
}
