//! Memory-mapped checkpoint access
//!
//! [`MappedGGUFModel`] maps a checkpoint file and parses its tables once;
//! [`TensorView`] is a zero-copy window over one tensor's quantized payload
//! inside that mapping. Weights are never copied to the heap, the kernel
//! pages them in on demand.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{InferirError, Result};
use crate::gguf::loader::GGUFModel;
use crate::gguf::types::QuantType;

// ============================================================================
// TensorView - zero-copy window over quantized payload bytes
// ============================================================================

/// Borrowed view of one tensor's payload bytes
///
/// The bytes stay in whatever backing store produced the view (usually the
/// mmap); element access and dot products decode blocks on the fly.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    bytes: &'a [u8],
    qtype: QuantType,
    num_elements: usize,
}

impl<'a> TensorView<'a> {
    /// Wrap raw payload bytes as a tensor view.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` when the byte count does not match the block
    /// geometry for `num_elements` values of `qtype`.
    pub fn new(bytes: &'a [u8], qtype: QuantType, num_elements: usize) -> Result<Self> {
        let expected = qtype.byte_size(num_elements);
        if bytes.len() != expected {
            return Err(InferirError::FormatError {
                reason: format!(
                    "tensor payload is {} bytes, expected {} for {} {:?} values",
                    bytes.len(),
                    expected,
                    num_elements,
                    qtype
                ),
            });
        }
        Ok(Self {
            bytes,
            qtype,
            num_elements,
        })
    }

    /// Raw payload bytes
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Quantization type of the payload
    #[must_use]
    pub fn qtype(&self) -> QuantType {
        self.qtype
    }

    /// Logical element count
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_elements
    }

    /// Whether the view holds zero elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_elements == 0
    }

    /// Narrow the view to `elem_len` elements starting at `elem_offset`.
    ///
    /// Used to split fused projections (e.g. a combined QKV tensor) into
    /// their parts without copying. The start must fall on a block boundary
    /// since blocks cannot be split.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` when the offset is not block-aligned or the
    /// range runs past the end of the view.
    pub fn subview(&self, elem_offset: usize, elem_len: usize) -> Result<TensorView<'a>> {
        let block_size = self.qtype.block_size();
        if elem_offset % block_size != 0 {
            return Err(InferirError::FormatError {
                reason: format!(
                    "subview offset {elem_offset} is not aligned to block size {block_size}"
                ),
            });
        }
        elem_offset
            .checked_add(elem_len)
            .filter(|&end| end <= self.num_elements)
            .ok_or_else(|| InferirError::FormatError {
                reason: format!(
                    "subview range [{elem_offset}, {elem_offset}+{elem_len}) exceeds {} elements",
                    self.num_elements
                ),
            })?;

        let byte_start = (elem_offset / block_size) * self.qtype.block_bytes();
        let byte_len = self.qtype.byte_size(elem_len);
        Self::new(&self.bytes[byte_start..byte_start + byte_len], self.qtype, elem_len)
    }
}

// ============================================================================
// MappedGGUFModel - parsed tables over a memory-mapped file
// ============================================================================

/// Memory-mapped checkpoint with parsed header, metadata, and descriptors
///
/// The map stays alive as long as this struct does; every [`TensorView`]
/// handed out borrows from it.
#[derive(Debug)]
pub struct MappedGGUFModel {
    /// Parsed container tables
    pub model: GGUFModel,
    mmap: Mmap,
}

impl MappedGGUFModel {
    /// Map a checkpoint file and parse its tables.
    ///
    /// # Errors
    ///
    /// Returns `IoError` when the file cannot be opened or mapped, and any
    /// parse error from the container tables.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| InferirError::IoError {
            message: format!("failed to open {}: {e}", path.display()),
        })?;

        // SAFETY: The mapping is read-only and stays valid as long as the
        // file is not truncated while mapped. We never write through it.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| InferirError::IoError {
                message: format!("failed to mmap {}: {e}", path.display()),
            })?
        };

        let model = GGUFModel::from_bytes(&mmap)?;
        Ok(Self { model, mmap })
    }

    /// Raw file contents
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Mapped file size in bytes
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.mmap.len()
    }

    /// Zero-copy view of a named tensor's payload.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` when the tensor is unknown or its descriptor
    /// points outside the mapped file.
    pub fn tensor_view(&self, name: &str) -> Result<TensorView<'_>> {
        let info = self
            .model
            .tensor(name)
            .ok_or_else(|| InferirError::FormatError {
                reason: format!("tensor '{name}' not found in checkpoint"),
            })?;

        let offset = usize::try_from(info.offset).map_err(|_| InferirError::FormatError {
            reason: format!("tensor '{name}' offset {} exceeds address space", info.offset),
        })?;
        let size = info.byte_size()?;
        let start = self
            .model
            .tensor_data_start()
            .checked_add(offset)
            .ok_or_else(|| InferirError::FormatError {
                reason: format!("tensor '{name}' offset overflows"),
            })?;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.mmap.len())
            .ok_or_else(|| InferirError::FormatError {
                reason: format!(
                    "tensor '{name}' data range [{start}, {}) exceeds file size {}",
                    start.saturating_add(size),
                    self.mmap.len()
                ),
            })?;

        TensorView::new(&self.mmap[start..end], info.qtype, info.num_elements()?)
    }

    /// Hint the kernel that the mapping will be read front to back.
    ///
    /// Matches llama.cpp's load-time `madvise(MADV_SEQUENTIAL)` strategy.
    #[cfg(unix)]
    pub fn advise_sequential(&self) {
        // SAFETY: The pointer and length describe our live mapping.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().cast_mut().cast::<libc::c_void>(),
                self.mmap.len(),
                libc::MADV_SEQUENTIAL,
            );
        }
    }

    /// Hint the kernel that weights will be touched in random order.
    #[cfg(unix)]
    pub fn advise_random(&self) {
        // SAFETY: The pointer and length describe our live mapping.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().cast_mut().cast::<libc::c_void>(),
                self.mmap.len(),
                libc::MADV_RANDOM,
            );
        }
    }

    /// Ask the kernel to prefetch the whole mapping.
    #[cfg(unix)]
    pub fn advise_willneed(&self) {
        // SAFETY: The pointer and length describe our live mapping.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().cast_mut().cast::<libc::c_void>(),
                self.mmap.len(),
                libc::MADV_WILLNEED,
            );
        }
    }

    /// Pin the mapping in RAM so it cannot be swapped out.
    ///
    /// Returns false when the lock fails, usually because of `RLIMIT_MEMLOCK`.
    #[cfg(unix)]
    pub fn lock_memory(&self) -> bool {
        // SAFETY: The pointer and length describe our live mapping.
        unsafe { libc::mlock(self.mmap.as_ptr().cast::<libc::c_void>(), self.mmap.len()) == 0 }
    }
}
