//! GGUF (GPT-Generated Unified Format) checkpoint reader
//!
//! Pure Rust reader for the GGUF binary format used by llama.cpp, Ollama,
//! and compatible tools.
//!
//! Format specification: <https://github.com/ggerganov/ggml/blob/master/docs/gguf.md>
//!
//! ## Module Structure
//!
//! - [`types`]: wire-level constants, value and descriptor types
//! - [`loader`]: header, metadata, and descriptor parsing from bytes
//! - [`config`]: hyperparameter extraction from parsed metadata
//! - [`store`]: memory-mapped checkpoints and zero-copy tensor views

pub mod config;
pub mod loader;
pub mod store;
pub mod types;

pub use config::ModelConfig;
pub use loader::GGUFModel;
pub use store::{MappedGGUFModel, TensorView};
pub use types::{
    GGUFHeader, GGUFValue, QuantType, TensorInfo, DEFAULT_ALIGNMENT, GGUF_MAGIC,
    SUPPORTED_VERSIONS,
};
