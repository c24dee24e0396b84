//! Tensors section: per-tensor metadata and payloads.
//!
//! ```text
//! data_type i32 | quant_profile i32 | context_len i32
//! tensor_count i64 | shape_count i64 | block_count i32 | unique_count i32
//! record * tensor_count
//! ```
//!
//! Each record:
//!
//! ```text
//! component i32 | block i32 | layer i32 | projection i32
//! n_dims i32 | dims i32 * n_dims | name string | data_type i32
//! [delta f32 | min f32 | max f32]   quantized types only
//! packing_flag u8 | payload
//! ```
//!
//! Counts and classification fields are derived at build time and
//! recomputed on read; a disagreement is `DerivedFieldMismatch`.

mod classify;

pub use classify::{classify, ComponentType, LayerType, ProjectionType, TensorClass};

use std::collections::BTreeSet;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AltError, Result};
use crate::magic::Marker;
use crate::primitive::{record_capacity, string_size, AltReader, AltWriter};
use crate::quantization::{decode_payload, encode_payload, DataType, QuantParams};
use crate::section::{SectionCodec, SectionHeader};

/// Default maximum context length recorded in the section.
pub const DEFAULT_CONTEXT_LEN: i32 = 8192;

/// Section metadata preceding the records.
const TENSORS_PREFIX_SIZE: u64 = 4 * 3 + 8 * 2 + 4 * 2;

/// Encoding options for the Tensors section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorsOptions {
    /// Storage type for every tensor
    pub data_type: DataType,
    /// Context length recorded in the section
    pub context_len: i32,
}

impl Default for TensorsOptions {
    fn default() -> Self {
        Self {
            data_type: DataType::Float32,
            context_len: DEFAULT_CONTEXT_LEN,
        }
    }
}

impl TensorsOptions {
    /// Float32 storage, default context length.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage type.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Set the context length.
    pub fn with_context_len(mut self, context_len: i32) -> Self {
        self.context_len = context_len;
        self
    }
}

/// A source tensor to be encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInput {
    /// Fully qualified name, e.g. `model.layers.0.mlp.up_proj.weight`
    pub name: String,
    /// Dimensions, outermost first
    pub shape: Vec<usize>,
    /// Row-major values
    pub data: Vec<f32>,
}

impl TensorInput {
    /// Create an input tensor.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }
}

fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

fn dim_to_i32(field: &'static str, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| AltError::InvalidField {
        field,
        value: value as i64,
    })
}

/// One encoded tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Tensor name
    pub name: String,
    /// Classification derived from the name
    pub class: TensorClass,
    /// Dimensions
    pub shape: Vec<usize>,
    /// Storage type
    pub data_type: DataType,
    /// Affine parameters, present exactly for quantized types
    pub params: Option<QuantParams>,
    /// Packing flag as written or read
    pub packing_flag: u8,
    /// Encoded payload
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl TensorRecord {
    /// Encode an input tensor as `data_type`.
    pub fn encode(input: &TensorInput, data_type: DataType) -> Result<Self> {
        let n = element_count(&input.shape).ok_or_else(|| {
            AltError::Tensor(format!("shape {:?} of {} overflows", input.shape, input.name))
        })?;
        if n != input.data.len() {
            return Err(AltError::Tensor(format!(
                "{}: shape {:?} holds {n} elements, data has {}",
                input.name,
                input.shape,
                input.data.len()
            )));
        }

        let (params, payload) = encode_payload(&input.data, data_type)
            .map_err(|e| AltError::Tensor(format!("{}: {e}", input.name)))?;

        Ok(Self {
            name: input.name.clone(),
            class: classify(&input.name),
            shape: input.shape.clone(),
            data_type,
            params,
            packing_flag: data_type.packing_flag(),
            payload,
        })
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        element_count(&self.shape).unwrap_or(0)
    }

    /// Dequantize the payload to f32.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        decode_payload(
            &self.payload,
            self.element_count(),
            self.data_type,
            self.params.as_ref(),
        )
    }

    /// Encoded size of this record.
    pub fn encoded_size(&self) -> u64 {
        let params = if self.data_type.is_quantized() {
            QuantParams::ENCODED_SIZE
        } else {
            0
        };
        4 * 5
            + 4 * self.shape.len() as u64
            + string_size(&self.name)
            + 4
            + params
            + 1
            + self.payload.len() as u64
    }

    fn validate(&self) -> Result<()> {
        self.data_type.validate_packing(self.packing_flag)?;
        if self.data_type.is_quantized() != self.params.is_some() {
            return Err(AltError::Tensor(format!(
                "{}: quantization parameters must be present exactly for quantized types",
                self.name
            )));
        }
        let expected = self.data_type.payload_len(self.element_count() as u64)?;
        if self.payload.len() as u64 != expected {
            return Err(AltError::Tensor(format!(
                "{}: payload is {} bytes, {} needs {expected}",
                self.name,
                self.payload.len(),
                self.data_type.name()
            )));
        }
        Ok(())
    }

    fn write<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        self.validate()?;

        w.write_i32(self.class.component_type().as_i32())?;
        w.write_i32(self.class.block_index())?;
        w.write_i32(self.class.layer_type().as_i32())?;
        w.write_i32(self.class.projection_type().as_i32())?;
        w.write_i32(dim_to_i32("n_dims", self.shape.len())?)?;
        for &dim in &self.shape {
            w.write_i32(dim_to_i32("dimension", dim)?)?;
        }
        w.write_string(&self.name)?;
        w.write_i32(self.data_type.as_i32())?;
        if let Some(params) = &self.params {
            params.write(w)?;
        }
        w.write_u8(self.packing_flag)?;
        w.write_bytes(&self.payload)
    }

    fn read<R: Read>(r: &mut AltReader<R>) -> Result<Self> {
        let component = ComponentType::try_from(r.read_i32()?)?;
        let block_index = r.read_i32()?;
        let layer_type = LayerType::try_from(r.read_i32()?)?;
        let projection = ProjectionType::try_from(r.read_i32()?)?;

        let n_dims = r.read_count("n_dims")?;
        let mut shape = Vec::with_capacity((n_dims as usize).min(8));
        for _ in 0..n_dims {
            shape.push(r.read_count("dimension")? as usize);
        }
        let name = r.read_string()?;

        let data_type = DataType::try_from(r.read_i32()?)?;
        let params = if data_type.is_quantized() {
            Some(QuantParams::read(r)?)
        } else {
            None
        };
        let packing_flag = r.read_u8()?;
        data_type.validate_packing(packing_flag)?;

        let n = element_count(&shape).ok_or(AltError::InvalidField {
            field: "element count",
            value: -1,
        })?;
        let payload = r.read_bytes(data_type.payload_len(n as u64)?)?;

        let class = classify(&name);
        check_derived("component_type", component.as_i32(), class.component_type().as_i32())?;
        check_derived("block_index", block_index, class.block_index())?;
        check_derived("layer_type", layer_type.as_i32(), class.layer_type().as_i32())?;
        check_derived(
            "projection_type",
            projection.as_i32(),
            class.projection_type().as_i32(),
        )?;

        Ok(Self {
            name,
            class,
            shape,
            data_type,
            params,
            packing_flag,
            payload,
        })
    }
}

fn check_derived(field: &'static str, stored: impl Into<i64>, derived: impl Into<i64>) -> Result<()> {
    let (stored, derived) = (stored.into(), derived.into());
    if stored != derived {
        return Err(AltError::DerivedFieldMismatch {
            field,
            stored,
            derived,
        });
    }
    Ok(())
}

/// Body of the Tensors section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorsRecord {
    /// Section storage type
    pub data_type: DataType,
    /// Maximum context length
    pub context_len: i32,
    /// Records in source order
    pub tensors: Vec<TensorRecord>,
}

impl TensorsRecord {
    /// Encode every input with the given options, preserving input order.
    pub fn from_inputs<I>(inputs: I, options: &TensorsOptions) -> Result<Self>
    where
        I: IntoIterator<Item = TensorInput>,
    {
        let tensors = inputs
            .into_iter()
            .map(|input| TensorRecord::encode(&input, options.data_type))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            count = tensors.len(),
            data_type = options.data_type.name(),
            "encoded tensors"
        );
        Ok(Self {
            data_type: options.data_type,
            context_len: options.context_len,
            tensors,
        })
    }

    /// Sum of `n_dims` over all records.
    pub fn shape_count(&self) -> i64 {
        self.tensors.iter().map(|t| t.shape.len() as i64).sum()
    }

    /// Number of distinct transformer blocks.
    pub fn block_count(&self) -> i32 {
        self.distinct_blocks(|b| b >= 0)
    }

    /// Number of distinct singleton components.
    pub fn unique_count(&self) -> i32 {
        self.distinct_blocks(|b| b < 0)
    }

    fn distinct_blocks(&self, keep: impl Fn(i32) -> bool) -> i32 {
        let blocks: BTreeSet<i32> = self
            .tensors
            .iter()
            .map(|t| t.class.block_index())
            .filter(|&b| keep(b))
            .collect();
        blocks.len() as i32
    }

    /// Look up a record by name.
    pub fn get(&self, name: &str) -> Option<&TensorRecord> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Total payload bytes.
    pub fn payload_bytes(&self) -> u64 {
        self.tensors.iter().map(|t| t.payload.len() as u64).sum()
    }
}

impl SectionCodec for TensorsRecord {
    const MARKER: Marker = Marker::Tensors;

    fn size(&self) -> u64 {
        TENSORS_PREFIX_SIZE
            + self
                .tensors
                .iter()
                .map(TensorRecord::encoded_size)
                .sum::<u64>()
    }

    fn write_body<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        w.write_i32(self.data_type.as_i32())?;
        w.write_i32(self.data_type.quant_profile().as_i32())?;
        w.write_i32(self.context_len)?;
        w.write_i64(self.tensors.len() as i64)?;
        w.write_i64(self.shape_count())?;
        w.write_i32(self.block_count())?;
        w.write_i32(self.unique_count())?;

        for tensor in &self.tensors {
            tensor.write(w)?;
        }
        Ok(())
    }

    fn read_body<R: Read>(r: &mut AltReader<R>, header: &SectionHeader) -> Result<Self> {
        let data_type = DataType::try_from(r.read_i32()?)?;
        let quant_profile = r.read_i32()?;
        check_derived(
            "quant_profile",
            quant_profile,
            data_type.quant_profile().as_i32(),
        )?;
        let context_len = r.read_i32()?;

        let tensor_count = r.read_i64()?;
        if tensor_count < 0 {
            return Err(AltError::InvalidField {
                field: "tensor_count",
                value: tensor_count,
            });
        }
        let shape_count = r.read_i64()?;
        let block_count = r.read_i32()?;
        let unique_count = r.read_i32()?;

        // Smallest record: five i32, empty name, data_type, flag.
        let mut tensors = Vec::with_capacity(record_capacity(
            tensor_count as u64,
            header.body_size.saturating_sub(TENSORS_PREFIX_SIZE),
            29,
        ));
        for _ in 0..tensor_count {
            tensors.push(TensorRecord::read(r)?);
        }

        let record = Self {
            data_type,
            context_len,
            tensors,
        };
        check_derived("shape_count", shape_count, record.shape_count())?;
        check_derived("block_count", block_count, record.block_count())?;
        check_derived("unique_count", unique_count, record.unique_count())?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tiny_inputs() -> Vec<TensorInput> {
        vec![
            TensorInput::new("model.embed_tokens.weight", vec![4, 2], (0..8).map(|i| i as f32).collect()),
            TensorInput::new("model.layers.0.self_attn.q_proj.weight", vec![2, 2], vec![0.5, -0.5, 1.0, -1.0]),
            TensorInput::new("model.layers.0.input_layernorm.weight", vec![2], vec![1.0, 1.0]),
            TensorInput::new("model.layers.1.mlp.up_proj.weight", vec![2, 2], vec![0.1, 0.2, 0.3, 0.4]),
            TensorInput::new("model.norm.weight", vec![2], vec![1.0, 0.9]),
            TensorInput::new("lm_head.weight", vec![4, 2], vec![0.0; 8]),
        ]
    }

    fn encode(record: &TensorsRecord) -> Vec<u8> {
        let mut w = AltWriter::new(Vec::new());
        record.write(&mut w).unwrap();
        w.into_inner()
    }

    fn decode(bytes: Vec<u8>) -> Result<TensorsRecord> {
        TensorsRecord::read(&mut AltReader::new(Cursor::new(bytes)))
    }

    #[test]
    fn test_derived_counts() {
        let record = TensorsRecord::from_inputs(tiny_inputs(), &TensorsOptions::new()).unwrap();
        assert_eq!(record.tensors.len(), 6);
        assert_eq!(record.shape_count(), 2 + 2 + 1 + 2 + 1 + 2);
        assert_eq!(record.block_count(), 2);
        assert_eq!(record.unique_count(), 3);
        assert_eq!(record.context_len, DEFAULT_CONTEXT_LEN);
    }

    #[test]
    fn test_round_trip_each_data_type() {
        for data_type in [DataType::Float32, DataType::Float16, DataType::QInt8, DataType::QInt4] {
            let options = TensorsOptions::new()
                .with_data_type(data_type)
                .with_context_len(4096);
            let record = TensorsRecord::from_inputs(tiny_inputs(), &options).unwrap();
            let bytes = encode(&record);
            assert_eq!(bytes.len() % 32, 0);

            let decoded = decode(bytes).unwrap();
            assert_eq!(decoded, record, "{}", data_type.name());
            assert_eq!(decoded.context_len, 4096);
        }
    }

    #[test]
    fn test_q4_packed_four_elements() {
        let input = TensorInput::new("model.layers.0.mlp.gate_proj.weight", vec![2, 2], vec![0.0, 7.0, 3.0, 1.0]);
        let record = TensorRecord::encode(&input, DataType::QInt4).unwrap();
        assert_eq!(record.payload.len(), 2);
        assert_eq!(record.packing_flag, 1);
        assert_eq!(record.to_f32().unwrap(), vec![0.0, 7.0, 3.0, 1.0]);
    }

    #[test]
    fn test_float_records_omit_quant_params() {
        let input = TensorInput::new("model.norm.weight", vec![3], vec![1.0, 2.0, 3.0]);
        let f32_record = TensorRecord::encode(&input, DataType::Float32).unwrap();
        let q8_record = TensorRecord::encode(&input, DataType::QInt8).unwrap();
        assert!(f32_record.params.is_none());
        assert_eq!(
            f32_record.encoded_size(),
            20 + 4 + string_size("model.norm.weight") + 4 + 1 + 12
        );
        assert_eq!(
            q8_record.encoded_size(),
            20 + 4 + string_size("model.norm.weight") + 4 + 12 + 1 + 3
        );
    }

    #[test]
    fn test_shape_data_mismatch() {
        let input = TensorInput::new("lm_head.weight", vec![2, 3], vec![0.0; 5]);
        assert!(matches!(
            TensorRecord::encode(&input, DataType::Float32),
            Err(AltError::Tensor(_))
        ));
    }

    #[test]
    fn test_packing_flag_on_float32_rejected_on_write() {
        let input = TensorInput::new("model.norm.weight", vec![2], vec![1.0, 2.0]);
        let mut record = TensorRecord::encode(&input, DataType::Float32).unwrap();
        record.packing_flag = 1;
        let section = TensorsRecord {
            data_type: DataType::Float32,
            context_len: DEFAULT_CONTEXT_LEN,
            tensors: vec![record],
        };
        let mut w = AltWriter::new(Vec::new());
        assert!(matches!(
            section.write(&mut w),
            Err(AltError::InvalidPacking { data_type: DataType::Float32, flag: 1 })
        ));
    }

    #[test]
    fn test_packing_flag_on_float32_rejected_on_read() {
        let input = TensorInput::new("model.norm.weight", vec![2], vec![1.0, 2.0]);
        let record = TensorsRecord::from_inputs(vec![input], &TensorsOptions::new()).unwrap();
        let mut bytes = encode(&record);
        // header 16, prefix 36, record fields 20 + 4, name 4 + 17, data_type 4
        let flag_at = 16 + 36 + 24 + 21 + 4;
        assert_eq!(bytes[flag_at], 0);
        bytes[flag_at] = 1;

        assert!(matches!(
            decode(bytes),
            Err(AltError::InvalidPacking { data_type: DataType::Float32, flag: 1 })
        ));
    }

    #[test]
    fn test_block_count_mismatch() {
        let record = TensorsRecord::from_inputs(tiny_inputs(), &TensorsOptions::new()).unwrap();
        let mut bytes = encode(&record);
        // header 16, data_type, quant_profile, context_len, two i64
        let block_count_at = 16 + 12 + 16;
        bytes[block_count_at..block_count_at + 4].copy_from_slice(&5i32.to_le_bytes());

        assert!(matches!(
            decode(bytes),
            Err(AltError::DerivedFieldMismatch { field: "block_count", stored: 5, derived: 2 })
        ));
    }

    #[test]
    fn test_quant_profile_mismatch() {
        let options = TensorsOptions::new().with_data_type(DataType::QInt8);
        let record = TensorsRecord::from_inputs(tiny_inputs(), &options).unwrap();
        let mut bytes = encode(&record);
        bytes[20..24].copy_from_slice(&0i32.to_le_bytes());

        assert!(matches!(
            decode(bytes),
            Err(AltError::DerivedFieldMismatch { field: "quant_profile", .. })
        ));
    }

    #[test]
    fn test_classification_mismatch() {
        let input = TensorInput::new("model.layers.3.mlp.up_proj.weight", vec![1], vec![1.0]);
        let record = TensorsRecord::from_inputs(vec![input], &TensorsOptions::new()).unwrap();
        let mut bytes = encode(&record);
        let block_at = 16 + 36 + 4;
        assert_eq!(&bytes[block_at..block_at + 4], &3i32.to_le_bytes());
        bytes[block_at..block_at + 4].copy_from_slice(&4i32.to_le_bytes());

        assert!(matches!(
            decode(bytes),
            Err(AltError::DerivedFieldMismatch { field: "block_index", stored: 4, derived: 3 })
        ));
    }

    #[test]
    fn test_unsupported_record_data_type() {
        let input = TensorInput::new("model.norm.weight", vec![1], vec![1.0]);
        let record = TensorsRecord::from_inputs(vec![input], &TensorsOptions::new()).unwrap();
        let mut bytes = encode(&record);
        let dtype_at = 16 + 36 + 24 + 21;
        bytes[dtype_at..dtype_at + 4].copy_from_slice(&9i32.to_le_bytes());

        assert!(matches!(decode(bytes), Err(AltError::UnsupportedDataType(9))));
    }

    fn with_dims(dims: [i32; 3], body_size: Option<u64>) -> Vec<u8> {
        let input = TensorInput::new("model.norm.weight", vec![1, 1, 1], vec![1.0]);
        let record = TensorsRecord::from_inputs(vec![input], &TensorsOptions::new()).unwrap();
        let mut bytes = encode(&record);
        if let Some(size) = body_size {
            bytes[8..16].copy_from_slice(&size.to_le_bytes());
        }
        // header 16, prefix 36, four class fields and n_dims
        let dims_at = 16 + 36 + 20;
        for (i, dim) in dims.iter().enumerate() {
            let at = dims_at + 4 * i;
            bytes[at..at + 4].copy_from_slice(&dim.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_overflowing_dims_rejected() {
        let bytes = with_dims([i32::MAX, i32::MAX, 2], None);
        assert!(matches!(
            decode(bytes),
            Err(AltError::InvalidField { field: "element count", .. })
        ));
    }

    #[test]
    fn test_huge_payload_past_input_end() {
        let bytes = with_dims([1 << 20, 1 << 20, 1 << 12], Some(u64::MAX));
        assert!(matches!(decode(bytes), Err(AltError::Io(_))));
    }

    #[test]
    fn test_huge_payload_within_declared_body() {
        let bytes = with_dims([1 << 20, 1 << 20, 1 << 12], None);
        assert!(matches!(
            decode(bytes),
            Err(AltError::SizeMismatch { section: Marker::Tensors, .. })
        ));
    }

    #[test]
    fn test_empty_section() {
        let record = TensorsRecord::from_inputs(Vec::new(), &TensorsOptions::new()).unwrap();
        assert_eq!(record.size(), 36);
        assert_eq!(decode(encode(&record)).unwrap(), record);
    }
}
