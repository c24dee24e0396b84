//! Tensor storage types and affine quantization.
//!
//! Quantization is per tensor: one `(delta, min, max)` triple covers every
//! element.
//!
//! ```text
//! delta = (max - min) / range        range = 127 (q8) or 7 (q4)
//! code  = clamp(round((x - min) / delta), 0, range)
//! x'    = min + code * delta         |x - x'| <= delta / 2
//! ```
//!
//! 4-bit codes are packed two per byte, element `2i` in the low nibble.

use std::io::{Read, Write};

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{AltError, Result};
use crate::primitive::{AltReader, AltWriter};

/// Storage type of a tensor payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DataType {
    /// IEEE binary32
    Float32 = 0,
    /// IEEE binary16
    Float16 = 1,
    /// 8-bit affine codes, one per byte
    QInt8 = 2,
    /// 4-bit affine codes, two per byte
    QInt4 = 3,
}

impl DataType {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Float16 => "float16",
            DataType::QInt8 => "qint8",
            DataType::QInt4 => "qint4",
        }
    }

    /// True for the affine-quantized types.
    pub fn is_quantized(self) -> bool {
        matches!(self, DataType::QInt8 | DataType::QInt4)
    }

    /// Largest code value, `None` for float types.
    pub fn quant_range(self) -> Option<u8> {
        match self {
            DataType::QInt8 => Some(127),
            DataType::QInt4 => Some(7),
            DataType::Float32 | DataType::Float16 => None,
        }
    }

    /// Quantization profile implied by this type.
    pub fn quant_profile(self) -> QuantProfile {
        match self {
            DataType::Float32 | DataType::Float16 => QuantProfile::Unquantized,
            DataType::QInt8 => QuantProfile::QInt8,
            DataType::QInt4 => QuantProfile::QInt4,
        }
    }

    /// Packing flag written for this type.
    pub fn packing_flag(self) -> u8 {
        u8::from(self == DataType::QInt4)
    }

    /// Reject a packing flag that does not match this type.
    pub fn validate_packing(self, flag: u8) -> Result<()> {
        if flag != self.packing_flag() {
            return Err(AltError::InvalidPacking {
                data_type: self,
                flag,
            });
        }
        Ok(())
    }

    /// Payload bytes for `n` elements. Fails when the length overflows `u64`.
    pub fn payload_len(self, n: u64) -> Result<u64> {
        let len = match self {
            DataType::Float32 => n.checked_mul(4),
            DataType::Float16 => n.checked_mul(2),
            DataType::QInt8 => Some(n),
            DataType::QInt4 => Some(n.div_ceil(2)),
        };
        len.ok_or(AltError::InvalidField {
            field: "element count",
            value: i64::try_from(n).unwrap_or(i64::MAX),
        })
    }
}

impl TryFrom<i32> for DataType {
    type Error = AltError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(DataType::Float32),
            1 => Ok(DataType::Float16),
            2 => Ok(DataType::QInt8),
            3 => Ok(DataType::QInt4),
            other => Err(AltError::UnsupportedDataType(other)),
        }
    }
}

/// Section-level quantization profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum QuantProfile {
    /// Float storage
    Unquantized = 0,
    /// 8-bit codes
    QInt8 = 1,
    /// 4-bit codes
    QInt4 = 2,
}

impl QuantProfile {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

// ============================================================================
// Affine parameters
// ============================================================================

/// Per-tensor affine quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuantParams {
    /// Step between adjacent codes
    pub delta: f32,
    /// Value of code 0
    pub min: f32,
    /// Largest input value
    pub max: f32,
}

impl QuantParams {
    /// Encoded size: three f32.
    pub const ENCODED_SIZE: u64 = 12;

    /// Fit parameters to `values` for a quantized `data_type`.
    pub fn fit(values: &[f32], data_type: DataType) -> Result<Self> {
        let range = data_type.quant_range().ok_or_else(|| {
            AltError::Tensor(format!("{} is not a quantized type", data_type.name()))
        })?;
        check_finite(values)?;

        if values.is_empty() {
            return Ok(Self::default());
        }

        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let delta = (max - min) / range as f32;
        if !delta.is_finite() {
            return Err(AltError::Tensor(format!(
                "value range [{min}, {max}] too wide to quantize"
            )));
        }
        Ok(Self { delta, min, max })
    }

    /// Code for one value.
    pub fn quantize(&self, value: f32, range: u8) -> u8 {
        if self.delta == 0.0 {
            return 0;
        }
        ((value - self.min) / self.delta)
            .round()
            .clamp(0.0, range as f32) as u8
    }

    /// Value for one code.
    pub fn dequantize(&self, code: u8) -> f32 {
        self.min + code as f32 * self.delta
    }

    /// Write `delta, min, max`.
    pub fn write<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        w.write_f32(self.delta)?;
        w.write_f32(self.min)?;
        w.write_f32(self.max)
    }

    /// Read `delta, min, max`.
    pub fn read<R: Read>(r: &mut AltReader<R>) -> Result<Self> {
        Ok(Self {
            delta: r.read_f32()?,
            min: r.read_f32()?,
            max: r.read_f32()?,
        })
    }
}

fn check_finite(values: &[f32]) -> Result<()> {
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(AltError::Tensor(format!(
            "non-finite value {} at element {index}",
            values[index]
        )));
    }
    Ok(())
}

// ============================================================================
// Nibble packing
// ============================================================================

/// Pack 4-bit codes two per byte, element `2i` in the low nibble.
pub fn pack_nibbles(codes: &[u8]) -> Vec<u8> {
    codes
        .chunks(2)
        .map(|pair| {
            let lo = pair[0] & 0x0F;
            let hi = pair.get(1).map_or(0, |c| c & 0x0F);
            lo | (hi << 4)
        })
        .collect()
}

/// Unpack `n` 4-bit codes.
pub fn unpack_nibbles(packed: &[u8], n: usize) -> Vec<u8> {
    packed
        .iter()
        .flat_map(|&b| [b & 0x0F, b >> 4])
        .take(n)
        .collect()
}

// ============================================================================
// Payload encoding
// ============================================================================

/// Encode `values` as a payload of `data_type`.
///
/// Returns the quantization parameters (quantized types only) and the bytes.
pub fn encode_payload(values: &[f32], data_type: DataType) -> Result<(Option<QuantParams>, Vec<u8>)> {
    check_finite(values)?;
    match data_type {
        DataType::Float32 => Ok((None, values.iter().flat_map(|v| v.to_le_bytes()).collect())),
        DataType::Float16 => Ok((
            None,
            values
                .iter()
                .flat_map(|&v| f16::from_f32(v).to_le_bytes())
                .collect(),
        )),
        DataType::QInt8 | DataType::QInt4 => {
            let params = QuantParams::fit(values, data_type)?;
            let range = data_type.quant_range().unwrap_or(0);
            let codes: Vec<u8> = values.iter().map(|&v| params.quantize(v, range)).collect();
            let payload = if data_type == DataType::QInt4 {
                pack_nibbles(&codes)
            } else {
                codes
            };
            Ok((Some(params), payload))
        }
    }
}

/// Decode a payload of `n` elements back to f32.
pub fn decode_payload(
    payload: &[u8],
    n: usize,
    data_type: DataType,
    params: Option<&QuantParams>,
) -> Result<Vec<f32>> {
    let expected = data_type.payload_len(n as u64)?;
    if payload.len() as u64 != expected {
        return Err(AltError::Tensor(format!(
            "{} payload for {n} elements must be {expected} bytes, got {}",
            data_type.name(),
            payload.len()
        )));
    }

    match data_type {
        DataType::Float32 => Ok(payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()),
        DataType::Float16 => Ok(payload
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect()),
        DataType::QInt8 | DataType::QInt4 => {
            let params = params.ok_or_else(|| {
                AltError::Tensor(format!("{} payload without parameters", data_type.name()))
            })?;
            let codes = if data_type == DataType::QInt4 {
                unpack_nibbles(payload, n)
            } else {
                payload.to_vec()
            };
            Ok(codes.into_iter().map(|c| params.dequantize(c)).collect())
        }
    }
}

// ============================================================================
// Scalar reference quantizer
// ============================================================================

/// Integer domain of [`QuantizedScalar`].
const Z_DOMAIN: f32 = 255.0;

/// Lossless single-value quantization with an explicit residual.
///
/// The value is mapped onto the integer domain `[-255, 255]` over the real
/// range `[-|v|, |v|]`; whatever rounding loses is kept in `residual`, so
/// [`QuantizedScalar::dequantize`] reproduces the input bit for bit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizedScalar {
    /// Step scaled by `alpha`
    pub scalar: f32,
    /// Range compression factor
    pub alpha: f32,
    /// Integer code
    pub bits: i32,
    /// `value - bits * step`
    pub residual: f32,
}

impl QuantizedScalar {
    /// Encoded size: scalar, alpha, bits, residual.
    pub const ENCODED_SIZE: u64 = 16;

    /// Quantize one value.
    ///
    /// The domain is `2 * |value|`; every quantity is derived from its half
    /// so that values near `f32::MAX` stay finite.
    pub fn quantize(value: f32) -> Self {
        let magnitude = value.abs();
        if magnitude == 0.0 {
            return Self {
                scalar: 1.0,
                alpha: 1.0,
                bits: 0,
                residual: 0.0,
            };
        }

        let half_domain = Z_DOMAIN / 2.0;
        let alpha = if magnitude > half_domain {
            half_domain / magnitude
        } else {
            1.0
        };
        let step = magnitude / half_domain;
        let bits = if step > 0.0 {
            (value / step).round() as i32
        } else {
            0
        };
        let scalar = step * alpha;

        let mut q = Self {
            scalar,
            alpha,
            bits,
            residual: 0.0,
        };
        // bits may round up to 128 steps, which overflows next to f32::MAX
        if !q.base().is_finite() {
            q.bits -= bits.signum();
        }
        q.residual = value - q.base();
        q
    }

    fn base(&self) -> f32 {
        self.bits as f32 * (self.scalar / self.alpha)
    }

    /// Reconstruct the value.
    pub fn dequantize(&self) -> f32 {
        self.base() + self.residual
    }

    /// Write the 16-byte encoding.
    pub fn write<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        w.write_f32(self.scalar)?;
        w.write_f32(self.alpha)?;
        w.write_i32(self.bits)?;
        w.write_f32(self.residual)
    }

    /// Read the 16-byte encoding.
    pub fn read<R: Read>(r: &mut AltReader<R>) -> Result<Self> {
        Ok(Self {
            scalar: r.read_f32()?,
            alpha: r.read_f32()?,
            bits: r.read_i32()?,
            residual: r.read_f32()?,
        })
    }
}
