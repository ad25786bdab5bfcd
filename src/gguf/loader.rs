//! Binary container parser
//!
//! Reads a GGUF byte stream into a [`GGUFModel`]: validated header, typed
//! metadata table, tensor descriptor table, resolved alignment, and the
//! tensor-data origin. Parsing is all-or-nothing; any violation aborts the
//! load and nothing partial is returned.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{InferirError, Result};
use crate::gguf::types::{
    GGUFHeader, GGUFValue, QuantType, TensorInfo, ALIGNMENT_KEY, DEFAULT_ALIGNMENT, GGUF_MAGIC,
    MAX_KEY_LENGTH, MAX_TABLE_ENTRIES, MAX_TENSOR_DIMS, MAX_TENSOR_NAME_LENGTH,
    SUPPORTED_VERSIONS,
};

// ============================================================================
// Byte Reader
// ============================================================================

/// Little-endian reader over an in-memory byte source.
///
/// Short reads surface as `IoError`; semantic violations are the caller's
/// concern.
pub(crate) struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Current byte position from the start of the source
    pub(crate) fn position(&self) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.cursor.position() as usize
        }
    }

    fn read_exact(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        self.cursor
            .read_exact(buf)
            .map_err(|e| InferirError::IoError {
                message: format!("short read while reading {what}: {e}"),
            })
    }

    pub(crate) fn read_u8(&mut self, what: &str) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf, what)?;
        Ok(buf[0])
    }

    pub(crate) fn read_i8(&mut self, what: &str) -> Result<i8> {
        #[allow(clippy::cast_possible_wrap)]
        Ok(self.read_u8(what)? as i8)
    }

    pub(crate) fn read_u16(&mut self, what: &str) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf, what)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub(crate) fn read_i16(&mut self, what: &str) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf, what)?;
        Ok(i16::from_le_bytes(buf))
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn read_i32(&mut self, what: &str) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf, what)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub(crate) fn read_u64(&mut self, what: &str) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf, what)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub(crate) fn read_i64(&mut self, what: &str) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf, what)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub(crate) fn read_f32(&mut self, what: &str) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf, what)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub(crate) fn read_f64(&mut self, what: &str) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf, what)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub(crate) fn read_bool(&mut self, what: &str) -> Result<bool> {
        Ok(self.read_u8(what)? != 0)
    }

    /// Read a u64-length-prefixed UTF-8 string
    pub(crate) fn read_string(&mut self, what: &str) -> Result<String> {
        let len_u64 = self.read_u64(what)?;
        let len = usize::try_from(len_u64).map_err(|_| InferirError::FormatError {
            reason: format!("{what} length {len_u64} exceeds the platform address space"),
        })?;

        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes, what)?;

        String::from_utf8(bytes).map_err(|e| InferirError::FormatError {
            reason: format!("{what} is not valid UTF-8: {e}"),
        })
    }
}

/// Narrow a u64 count to usize, rejecting truncation
fn checked_count(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| InferirError::FormatError {
        reason: format!("{what} {value} exceeds the platform address space"),
    })
}

// ============================================================================
// Parsed Container
// ============================================================================

/// A fully parsed container: header, metadata, descriptors, and the resolved
/// layout facts (alignment, tensor-data origin).
///
/// Holds no tensor payload bytes; pair it with
/// [`MappedGGUFModel`](crate::gguf::MappedGGUFModel) for zero-copy access to
/// tensor data.
#[derive(Debug, Clone)]
pub struct GGUFModel {
    /// Validated container header
    pub header: GGUFHeader,
    /// Metadata key/value table
    pub metadata: HashMap<String, GGUFValue>,
    /// Tensor descriptors in declaration order
    pub tensors: Vec<TensorInfo>,
    tensor_index: HashMap<String, usize>,
    alignment: usize,
    tensor_data_start: usize,
}

impl GGUFModel {
    /// Parse a container from bytes.
    ///
    /// The byte slice only needs to cover the header, metadata, and
    /// descriptor tables; tensor payload bytes past the origin are not
    /// touched here.
    ///
    /// # Errors
    ///
    /// - `FormatError`: bad magic, unsupported version, oversized counts or
    ///   names, duplicate keys or tensor names, misaligned tensor offsets,
    ///   non-power-of-two alignment override
    /// - `IoError`: the source ends mid-structure
    /// - `UnsupportedType`: unknown metadata or tensor type tags
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let header = parse_header(&mut reader)?;
        let metadata_count = checked_count(header.metadata_kv_count, "metadata count")?;
        let tensor_count = checked_count(header.tensor_count, "tensor count")?;

        let metadata = parse_metadata(&mut reader, metadata_count)?;

        // The alignment override lives in metadata, which precedes the
        // descriptor table, so it is fixed before any offset is checked.
        let alignment = resolve_alignment(&metadata)?;

        let (tensors, tensor_index) = parse_tensor_infos(&mut reader, tensor_count, alignment)?;

        // Descriptors are followed by implicit padding up to the next
        // alignment boundary; that boundary is the tensor-data origin.
        let tensor_data_start = reader.position().div_ceil(alignment) * alignment;

        Ok(Self {
            header,
            metadata,
            tensors,
            tensor_index,
            alignment,
            tensor_data_start,
        })
    }

    /// Read and parse a container file from disk.
    ///
    /// # Errors
    ///
    /// `IoError` if the file cannot be read, plus everything
    /// [`from_bytes`](Self::from_bytes) can return.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref()).map_err(|e| InferirError::IoError {
            message: format!("failed to read {}: {e}", path.as_ref().display()),
        })?;
        Self::from_bytes(&data)
    }

    /// Look up a tensor descriptor by name
    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&TensorInfo> {
        self.tensor_index.get(name).map(|&i| &self.tensors[i])
    }

    /// Look up a metadata value by key
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&GGUFValue> {
        self.metadata.get(key)
    }

    /// Active tensor-data alignment (default 32, or the container override)
    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Byte offset where the tensor-data region begins; all descriptor
    /// offsets are relative to this position
    #[must_use]
    pub fn tensor_data_start(&self) -> usize {
        self.tensor_data_start
    }
}

// ============================================================================
// Parsing Stages
// ============================================================================

fn parse_header(reader: &mut ByteReader<'_>) -> Result<GGUFHeader> {
    let magic = reader.read_u32("magic")?;
    if magic != GGUF_MAGIC {
        return Err(InferirError::FormatError {
            reason: format!("invalid magic: 0x{magic:08X}, expected 0x{GGUF_MAGIC:08X}"),
        });
    }

    let version = reader.read_u32("version")?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(InferirError::FormatError {
            reason: format!("unsupported version {version}, supported: {SUPPORTED_VERSIONS:?}"),
        });
    }

    let tensor_count = reader.read_u64("tensor count")?;
    if tensor_count > MAX_TABLE_ENTRIES {
        return Err(InferirError::FormatError {
            reason: format!("tensor count {tensor_count} exceeds limit {MAX_TABLE_ENTRIES}"),
        });
    }

    let metadata_kv_count = reader.read_u64("metadata count")?;
    if metadata_kv_count > MAX_TABLE_ENTRIES {
        return Err(InferirError::FormatError {
            reason: format!("metadata count {metadata_kv_count} exceeds limit {MAX_TABLE_ENTRIES}"),
        });
    }

    Ok(GGUFHeader {
        magic,
        version,
        tensor_count,
        metadata_kv_count,
    })
}

fn parse_metadata(
    reader: &mut ByteReader<'_>,
    count: usize,
) -> Result<HashMap<String, GGUFValue>> {
    let mut metadata = HashMap::with_capacity(count);

    for _ in 0..count {
        let key = reader.read_string("metadata key")?;
        if key.len() > MAX_KEY_LENGTH {
            return Err(InferirError::FormatError {
                reason: format!("metadata key length {} exceeds {MAX_KEY_LENGTH}", key.len()),
            });
        }
        if !key.is_ascii() {
            return Err(InferirError::FormatError {
                reason: format!("metadata key '{key}' contains non-ASCII bytes"),
            });
        }

        let tag = reader.read_u32("metadata value type")?;
        let value = read_value(reader, tag, &key)?;

        if metadata.insert(key.clone(), value).is_some() {
            return Err(InferirError::FormatError {
                reason: format!("duplicate metadata key '{key}'"),
            });
        }
    }

    Ok(metadata)
}

/// Decode one typed value; array values recurse on their element type
fn read_value(reader: &mut ByteReader<'_>, tag: u32, key: &str) -> Result<GGUFValue> {
    match tag {
        0 => Ok(GGUFValue::UInt8(reader.read_u8(key)?)),
        1 => Ok(GGUFValue::Int8(reader.read_i8(key)?)),
        2 => Ok(GGUFValue::UInt16(reader.read_u16(key)?)),
        3 => Ok(GGUFValue::Int16(reader.read_i16(key)?)),
        4 => Ok(GGUFValue::UInt32(reader.read_u32(key)?)),
        5 => Ok(GGUFValue::Int32(reader.read_i32(key)?)),
        6 => Ok(GGUFValue::Float32(reader.read_f32(key)?)),
        7 => Ok(GGUFValue::Bool(reader.read_bool(key)?)),
        8 => Ok(GGUFValue::String(reader.read_string(key)?)),
        9 => {
            let element_tag = reader.read_u32(key)?;
            let len_u64 = reader.read_u64(key)?;
            let len = checked_count(len_u64, "array length")?;

            // Cap the pre-allocation; a hostile length past this point fails
            // on the short read instead of the allocator.
            let mut elements = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                elements.push(read_value(reader, element_tag, key)?);
            }
            Ok(GGUFValue::Array(elements))
        },
        10 => Ok(GGUFValue::UInt64(reader.read_u64(key)?)),
        11 => Ok(GGUFValue::Int64(reader.read_i64(key)?)),
        12 => Ok(GGUFValue::Float64(reader.read_f64(key)?)),
        other => Err(InferirError::UnsupportedType {
            type_id: other,
            context: format!("metadata key '{key}'"),
        }),
    }
}

/// Resolve the active alignment: the default, or a validated override
fn resolve_alignment(metadata: &HashMap<String, GGUFValue>) -> Result<usize> {
    match metadata.get(ALIGNMENT_KEY) {
        None => Ok(DEFAULT_ALIGNMENT),
        Some(value) => {
            let alignment = value.as_usize().ok_or_else(|| InferirError::FormatError {
                reason: format!("{ALIGNMENT_KEY} is not an unsigned integer: {value:?}"),
            })?;
            if !alignment.is_power_of_two() {
                return Err(InferirError::FormatError {
                    reason: format!("{ALIGNMENT_KEY} {alignment} is not a power of two"),
                });
            }
            Ok(alignment)
        },
    }
}

fn parse_tensor_infos(
    reader: &mut ByteReader<'_>,
    count: usize,
    alignment: usize,
) -> Result<(Vec<TensorInfo>, HashMap<String, usize>)> {
    let mut tensors = Vec::with_capacity(count);
    let mut index = HashMap::with_capacity(count);

    for _ in 0..count {
        let info = parse_tensor_info(reader, alignment)?;
        if index.insert(info.name.clone(), tensors.len()).is_some() {
            return Err(InferirError::FormatError {
                reason: format!("duplicate tensor name '{}'", info.name),
            });
        }
        tensors.push(info);
    }

    Ok((tensors, index))
}

fn parse_tensor_info(reader: &mut ByteReader<'_>, alignment: usize) -> Result<TensorInfo> {
    let name = reader.read_string("tensor name")?;
    if name.len() > MAX_TENSOR_NAME_LENGTH {
        return Err(InferirError::FormatError {
            reason: format!(
                "tensor name length {} exceeds {MAX_TENSOR_NAME_LENGTH}: '{}...'",
                name.len(),
                &name[..name.len().min(MAX_TENSOR_NAME_LENGTH)]
            ),
        });
    }

    let n_dims = reader.read_u32("tensor dimension count")? as usize;
    if n_dims > MAX_TENSOR_DIMS {
        return Err(InferirError::FormatError {
            reason: format!("tensor '{name}' has {n_dims} dimensions, maximum {MAX_TENSOR_DIMS}"),
        });
    }

    let mut dims = Vec::with_capacity(n_dims);
    for _ in 0..n_dims {
        dims.push(reader.read_u64("tensor dimension")?);
    }

    let tag = reader.read_u32("tensor type tag")?;
    let qtype = QuantType::from_tag(tag, &format!("tensor '{name}'"))?;

    let offset = reader.read_u64("tensor offset")?;
    if offset % alignment as u64 != 0 {
        return Err(InferirError::FormatError {
            reason: format!(
                "tensor '{name}' offset {offset} is not a multiple of alignment {alignment}"
            ),
        });
    }

    Ok(TensorInfo {
        name,
        dims,
        qtype,
        offset,
    })
}

// ============================================================================
// Tests
// ============================================================================
