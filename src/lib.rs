//! # Inferir
//!
//! Quantized checkpoint loading and single-token LLM inference in pure Rust.
//!
//! Inferir (Spanish: "to infer") memory-maps a GGUF checkpoint, exposes its
//! weight tensors as zero-copy quantized views, and drives a decoder-only
//! transformer one token at a time: forward pass, sampling, key/value cache
//! update. No GPU, no Python, no tokenizer dependency in the core.
//!
//! ## Pieces
//!
//! - **Container reader** ([`gguf`]): header, metadata, tensor descriptors,
//!   alignment handling, and a memory-mapped tensor store.
//! - **Quantized tensors** ([`tensor`]): one arithmetic contract over F32,
//!   F16, `Q4_0`, `Q8_0`, and `Q4_K` encodings, with fused dot kernels.
//! - **Forward pass** ([`transformer`]): RoPE, grouped-query attention over
//!   a KV cache, SwiGLU feed-forward, all reading weights in place.
//! - **Sampling** ([`sampler`]) and the **generation loop** ([`generate`]):
//!   greedy/categorical/nucleus strategies behind a seeded, reproducible
//!   session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use inferir::generate::{generate, GenerationOptions};
//! use inferir::gguf::MappedGGUFModel;
//! use inferir::transformer::{InferenceState, QuantizedTransformer};
//!
//! let mapped = MappedGGUFModel::open("model.gguf")?;
//! let model = QuantizedTransformer::from_mapped(&mapped)?;
//! let mut state = InferenceState::new(&model.config);
//!
//! let options = GenerationOptions::default().with_max_tokens(64);
//! let mut sampler = options.build_sampler();
//! let mut sink = |token: u32| {
//!     print!("{token} ");
//!     true
//! };
//! let output = generate(
//!     &model,
//!     &mut state,
//!     &[1, 15043],
//!     &[2],
//!     &options,
//!     &mut sampler,
//!     &mut sink,
//! )?;
//! println!("\nstopped: {:?}", output.reason);
//! # Ok::<(), inferir::InferirError>(())
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::missing_panics_doc)] // Fail-fast asserts documented where they matter
#![allow(clippy::missing_errors_doc)] // Error conditions live on the error enum
#![allow(clippy::similar_names)] // q/k/v projections are the domain vocabulary
#![allow(clippy::many_single_char_names)] // Math kernels use math names
#![allow(clippy::float_cmp)] // Exact comparison is intentional in tests

pub mod error;
pub mod generate;
pub mod gguf;
pub mod parallel;
pub mod sampler;
pub mod tensor;
pub mod transformer;
pub mod vocab;

pub use error::{InferirError, Result};
pub use generate::{
    generate, ChannelSink, ForwardModel, GenerationOptions, GenerationOutput, StopReason,
    TokenSink,
};
pub use gguf::{GGUFModel, MappedGGUFModel, ModelConfig, QuantType, TensorView};
pub use sampler::{Sampler, TokenSampler};
pub use tensor::QuantizedTensor;
pub use transformer::{InferenceState, QuantizedTransformer};
pub use vocab::{ByteFallbackFormat, ChatFormat, Vocabulary};

/// Crate version from Cargo metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
