//! Model hyperparameters extracted from container metadata
//!
//! Accessors resolve architecture-prefixed keys (`llama.block_count`,
//! `llama.attention.head_count`, ...) against the metadata table, and
//! [`ModelConfig`] bundles them into the immutable hyperparameter set the
//! rest of the crate consumes.

use serde::{Deserialize, Serialize};

use crate::error::{InferirError, Result};
use crate::gguf::loader::GGUFModel;
use crate::gguf::types::GGUFValue;

// ============================================================================
// Metadata Accessors
// ============================================================================

impl GGUFModel {
    /// Architecture string from `general.architecture`
    #[must_use]
    pub fn architecture(&self) -> Option<&str> {
        self.metadata_value("general.architecture")
            .and_then(GGUFValue::as_str)
    }

    /// Architecture-prefixed integer lookup: `{arch}.{suffix}`
    fn arch_usize(&self, suffix: &str) -> Option<usize> {
        let arch = self.architecture()?;
        self.metadata_value(&format!("{arch}.{suffix}"))
            .and_then(GGUFValue::as_usize)
    }

    /// Architecture-prefixed float lookup: `{arch}.{suffix}`
    fn arch_f32(&self, suffix: &str) -> Option<f32> {
        let arch = self.architecture()?;
        self.metadata_value(&format!("{arch}.{suffix}"))
            .and_then(GGUFValue::as_f32)
    }

    /// Embedding dimension from `{arch}.embedding_length`
    #[must_use]
    pub fn embedding_dim(&self) -> Option<usize> {
        self.arch_usize("embedding_length")
    }

    /// Layer count from `{arch}.block_count`
    #[must_use]
    pub fn num_layers(&self) -> Option<usize> {
        self.arch_usize("block_count")
    }

    /// Attention head count from `{arch}.attention.head_count`
    #[must_use]
    pub fn num_heads(&self) -> Option<usize> {
        self.arch_usize("attention.head_count")
    }

    /// Key/value head count from `{arch}.attention.head_count_kv`
    #[must_use]
    pub fn num_kv_heads(&self) -> Option<usize> {
        self.arch_usize("attention.head_count_kv")
    }

    /// Context length from `{arch}.context_length`
    #[must_use]
    pub fn context_length(&self) -> Option<usize> {
        self.arch_usize("context_length")
    }

    /// Feed-forward dimension from `{arch}.feed_forward_length`
    #[must_use]
    pub fn feed_forward_dim(&self) -> Option<usize> {
        self.arch_usize("feed_forward_length")
    }

    /// RMS-norm epsilon from `{arch}.attention.layer_norm_rms_epsilon`
    #[must_use]
    pub fn rms_epsilon(&self) -> Option<f32> {
        self.arch_f32("attention.layer_norm_rms_epsilon")
    }

    /// Rope frequency base from `{arch}.rope.freq_base`
    #[must_use]
    pub fn rope_theta(&self) -> Option<f32> {
        self.arch_f32("rope.freq_base")
    }

    /// Vocabulary size: length of `tokenizer.ggml.tokens` when present,
    /// otherwise the outer dimension of the embedding tensor
    #[must_use]
    pub fn vocab_size(&self) -> Option<usize> {
        if let Some(tokens) = self
            .metadata_value("tokenizer.ggml.tokens")
            .and_then(GGUFValue::as_array)
        {
            return Some(tokens.len());
        }
        let embd = self.tensor("token_embd.weight")?;
        embd.dims.get(1).and_then(|&d| usize::try_from(d).ok())
    }
}

// ============================================================================
// Model Configuration
// ============================================================================

/// Scalar hyperparameters of a loaded model. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model architecture (e.g. "llama", "qwen2")
    pub architecture: String,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Embedding dimension (hidden size)
    pub embedding_dim: usize,
    /// Number of transformer layers
    pub num_layers: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Number of key/value heads (grouped-query attention shares them)
    pub num_kv_heads: usize,
    /// Dimension per attention head
    pub head_dim: usize,
    /// Feed-forward intermediate dimension
    pub ffn_dim: usize,
    /// Maximum sequence length the model was trained for
    pub context_length: usize,
    /// RMS-norm epsilon
    pub rms_eps: f32,
    /// Rope position-encoding base frequency
    pub rope_theta: f32,
}

impl ModelConfig {
    /// Extract the hyperparameter set from parsed container metadata.
    ///
    /// Architecture, embedding dimension, layer count, and head count are
    /// required; the rest fall back to the conventional defaults when the
    /// checkpoint omits them.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` when a required field is missing or the head
    /// count does not divide the embedding dimension.
    pub fn from_metadata(model: &GGUFModel) -> Result<Self> {
        let architecture = model
            .architecture()
            .ok_or_else(|| InferirError::FormatError {
                reason: "missing general.architecture in metadata".to_string(),
            })?
            .to_string();

        let embedding_dim = model.embedding_dim().ok_or_else(|| InferirError::FormatError {
            reason: format!("missing {architecture}.embedding_length in metadata"),
        })?;

        let num_layers = model.num_layers().ok_or_else(|| InferirError::FormatError {
            reason: format!("missing {architecture}.block_count in metadata"),
        })?;

        let num_heads = model.num_heads().ok_or_else(|| InferirError::FormatError {
            reason: format!("missing {architecture}.attention.head_count in metadata"),
        })?;
        if num_heads == 0 || embedding_dim % num_heads != 0 {
            return Err(InferirError::FormatError {
                reason: format!(
                    "head count {num_heads} does not divide embedding dimension {embedding_dim}"
                ),
            });
        }
        let head_dim = embedding_dim / num_heads;

        let num_kv_heads = model.num_kv_heads().unwrap_or(num_heads);
        if num_kv_heads == 0 || num_heads % num_kv_heads != 0 {
            return Err(InferirError::FormatError {
                reason: format!(
                    "kv head count {num_kv_heads} does not divide head count {num_heads}"
                ),
            });
        }

        let vocab_size = model.vocab_size().ok_or_else(|| InferirError::FormatError {
            reason: "cannot determine vocabulary size: no tokenizer.ggml.tokens and no \
                     token_embd.weight tensor"
                .to_string(),
        })?;

        let ffn_dim = model.feed_forward_dim().unwrap_or(embedding_dim * 4);
        let context_length = model.context_length().unwrap_or(2048);
        let rms_eps = model.rms_epsilon().unwrap_or(1e-5);
        let rope_theta = model.rope_theta().unwrap_or(10_000.0);

        Ok(Self {
            architecture,
            vocab_size,
            embedding_dim,
            num_layers,
            num_heads,
            num_kv_heads,
            head_dim,
            ffn_dim,
            context_length,
            rms_eps,
            rope_theta,
        })
    }

    /// Key/value dimension per position: `num_kv_heads * head_dim`
    #[must_use]
    pub fn kv_dim(&self) -> usize {
        self.num_kv_heads * self.head_dim
    }
}
