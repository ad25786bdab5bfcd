//! GGUF wire types and constants
//!
//! Foundational types for container parsing:
//! - Magic number, supported versions, alignment rules
//! - The quantized-type table with block geometry
//! - Core structs: `GGUFHeader`, `GGUFValue`, `TensorInfo`

use crate::error::{InferirError, Result};

// ============================================================================
// Magic, Version, and Alignment Constants
// ============================================================================

/// GGUF magic number: "GGUF" in little-endian
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Container versions this parser accepts
pub const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

/// Tensor-data alignment when the container does not override it
pub const DEFAULT_ALIGNMENT: usize = 32;

/// Reserved metadata key carrying an alignment override
pub const ALIGNMENT_KEY: &str = "general.alignment";

/// Longest accepted metadata key, in bytes
pub const MAX_KEY_LENGTH: usize = 65_535;

/// Longest accepted tensor name, in bytes
pub const MAX_TENSOR_NAME_LENGTH: usize = 64;

/// Most dimensions a tensor descriptor may declare
pub const MAX_TENSOR_DIMS: usize = 4;

/// Upper bound on the tensor and metadata table sizes. Real checkpoints stay
/// far below this, so larger counts are treated as a corrupt header rather
/// than an allocation request.
pub const MAX_TABLE_ENTRIES: u64 = 1_000_000;

// ============================================================================
// Quantized Type Table
// ============================================================================

/// Element encoding of a tensor payload.
///
/// Block-quantized variants store values in fixed-size groups sharing scale
/// factors, so byte sizes come from block geometry, not a per-element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantType {
    /// 32-bit IEEE-754 float
    F32,
    /// 16-bit IEEE-754 half
    F16,
    /// 4-bit blocks of 32 values: f16 scale + 16 packed nibble bytes
    Q4_0,
    /// 8-bit blocks of 32 values: f16 scale + 32 signed bytes
    Q8_0,
    /// 4-bit super-blocks of 256 values: f16 d, f16 dmin, 12 bytes of packed
    /// 6-bit sub-block scales, 128 nibble bytes
    Q4K,
    /// 5-bit super-blocks of 256 values (size computation only)
    Q5K,
    /// 6-bit super-blocks of 256 values (size computation only)
    Q6K,
}

impl QuantType {
    /// Resolve a wire type tag against the supported table.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` for tags outside the table.
    pub fn from_tag(tag: u32, context: &str) -> Result<Self> {
        match tag {
            0 => Ok(Self::F32),
            1 => Ok(Self::F16),
            2 => Ok(Self::Q4_0),
            8 => Ok(Self::Q8_0),
            12 => Ok(Self::Q4K),
            13 => Ok(Self::Q5K),
            14 => Ok(Self::Q6K),
            other => Err(InferirError::UnsupportedType {
                type_id: other,
                context: context.to_string(),
            }),
        }
    }

    /// Wire tag for this type
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
            Self::Q4_0 => 2,
            Self::Q8_0 => 8,
            Self::Q4K => 12,
            Self::Q5K => 13,
            Self::Q6K => 14,
        }
    }

    /// Values per block
    #[must_use]
    pub fn block_size(self) -> usize {
        match self {
            Self::F32 | Self::F16 => 1,
            Self::Q4_0 | Self::Q8_0 => 32,
            Self::Q4K | Self::Q5K | Self::Q6K => 256,
        }
    }

    /// Bytes per block
    #[must_use]
    pub fn block_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::Q4_0 => 18,
            Self::Q8_0 => 34,
            Self::Q4K => 144,
            Self::Q5K => 176,
            Self::Q6K => 210,
        }
    }

    /// Bytes occupied by `num_elements` values, rounded up to whole blocks
    #[must_use]
    pub fn byte_size(self, num_elements: usize) -> usize {
        num_elements.div_ceil(self.block_size()) * self.block_bytes()
    }
}

// ============================================================================
// Header and Metadata Values
// ============================================================================

/// Parsed container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GGUFHeader {
    /// Magic number, validated against `GGUF_MAGIC`
    pub magic: u32,
    /// Format version, validated against `SUPPORTED_VERSIONS`
    pub version: u32,
    /// Number of tensor descriptors
    pub tensor_count: u64,
    /// Number of metadata key/value pairs
    pub metadata_kv_count: u64,
}

/// One typed metadata value.
///
/// Wire tags run 0..=12 in declaration order. Arrays (tag 9) carry an element
/// type tag and a u64 length, and may nest arbitrarily.
#[derive(Debug, Clone, PartialEq)]
pub enum GGUFValue {
    /// Unsigned 8-bit integer (tag 0)
    UInt8(u8),
    /// Signed 8-bit integer (tag 1)
    Int8(i8),
    /// Unsigned 16-bit integer (tag 2)
    UInt16(u16),
    /// Signed 16-bit integer (tag 3)
    Int16(i16),
    /// Unsigned 32-bit integer (tag 4)
    UInt32(u32),
    /// Signed 32-bit integer (tag 5)
    Int32(i32),
    /// 32-bit float (tag 6)
    Float32(f32),
    /// Boolean (tag 7)
    Bool(bool),
    /// Length-prefixed UTF-8 string (tag 8)
    String(String),
    /// Homogeneous array (tag 9)
    Array(Vec<GGUFValue>),
    /// Unsigned 64-bit integer (tag 10)
    UInt64(u64),
    /// Signed 64-bit integer (tag 11)
    Int64(i64),
    /// 64-bit float (tag 12)
    Float64(f64),
}

impl GGUFValue {
    /// Integer contents widened to u64, for unsigned and non-negative signed
    /// variants
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        #[allow(clippy::cast_sign_loss)]
        match *self {
            Self::UInt8(v) => Some(u64::from(v)),
            Self::UInt16(v) => Some(u64::from(v)),
            Self::UInt32(v) => Some(u64::from(v)),
            Self::UInt64(v) => Some(v),
            Self::Int8(v) if v >= 0 => Some(v as u64),
            Self::Int16(v) if v >= 0 => Some(v as u64),
            Self::Int32(v) if v >= 0 => Some(v as u64),
            Self::Int64(v) if v >= 0 => Some(v as u64),
            _ => None,
        }
    }

    /// Integer contents narrowed to usize, if the value fits
    #[must_use]
    pub fn as_usize(&self) -> Option<usize> {
        self.as_u64().and_then(|v| usize::try_from(v).ok())
    }

    /// Float contents, widening f32 and accepting integer-valued metadata
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        match *self {
            Self::Float32(v) => Some(v),
            Self::Float64(v) => Some(v as f32),
            _ => self.as_u64().map(|v| v as f32),
        }
    }

    /// String contents
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean contents
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Array elements
    #[must_use]
    pub fn as_array(&self) -> Option<&[GGUFValue]> {
        match self {
            Self::Array(elements) => Some(elements),
            _ => None,
        }
    }
}

// ============================================================================
// Tensor Descriptors
// ============================================================================

/// One entry of the container's tensor descriptor table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Tensor name, at most `MAX_TENSOR_NAME_LENGTH` bytes
    pub name: String,
    /// Dimension sizes, innermost first, at most `MAX_TENSOR_DIMS` entries
    pub dims: Vec<u64>,
    /// Element encoding of the payload
    pub qtype: QuantType,
    /// Byte offset relative to the tensor-data origin; always a multiple of
    /// the container's alignment
    pub offset: u64,
}

impl TensorInfo {
    /// Total element count across all dimensions.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` if the product overflows the address space.
    pub fn num_elements(&self) -> Result<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &dim| {
                usize::try_from(dim).ok().and_then(|d| acc.checked_mul(d))
            })
            .ok_or_else(|| InferirError::FormatError {
                reason: format!("tensor '{}' dimensions overflow: {:?}", self.name, self.dims),
            })
    }

    /// Payload size in bytes, from element count and block geometry.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` if the element count overflows.
    pub fn byte_size(&self) -> Result<usize> {
        Ok(self.qtype.byte_size(self.num_elements()?))
    }
}
