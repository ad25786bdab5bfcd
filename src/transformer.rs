//! Quantized transformer forward pass
//!
//! A decoder-only transformer operating directly on memory-mapped quantized
//! weights: pre-norm residual blocks with rotary position embeddings,
//! grouped-query attention, and a SwiGLU feed-forward. One [`forward`] call
//! consumes one token at one position, extends the key/value cache, and
//! produces logits over the vocabulary.
//!
//! Weight tensors follow the llama.cpp naming convention
//! (`token_embd.weight`, `blk.{i}.attn_q.weight`, `output_norm.weight`),
//! with two fallbacks for checkpoint variants: a fused
//! `blk.{i}.attn_qkv.weight` is split into views, and a missing
//! `output.weight` reuses the token embedding (tied LM head).
//!
//! Matrix-vector products fan out row-wise across the worker pool; attention
//! fans out per head. Everything else is sequential scalar work on scratch
//! buffers that live in [`InferenceState`], so a decode step performs no
//! allocation.
//!
//! [`forward`]: ForwardModel::forward

use rayon::prelude::*;

use crate::error::{InferirError, Result};
use crate::generate::ForwardModel;
use crate::gguf::{MappedGGUFModel, ModelConfig};
use crate::parallel::{self, PARALLEL_CHUNK_THRESHOLD};
use crate::tensor::QuantizedTensor;

/// Rows per work unit when fanning a matrix-vector product across the pool
const MATVEC_ROWS_PER_TASK: usize = 8;

// ============================================================================
// Inference state
// ============================================================================

/// Mutable per-conversation state: key/value cache plus scratch buffers.
///
/// Owned by exactly one generation at a time; the generation loop is the
/// only writer. Sized once from the model configuration so forward steps
/// never allocate. Cache rows at positions beyond the position counter are
/// stale and never read.
#[derive(Debug)]
pub struct InferenceState {
    /// Per-layer key cache, `context_length * kv_dim` values each
    pub key_cache: Vec<Vec<f32>>,
    /// Per-layer value cache, `context_length * kv_dim` values each
    pub value_cache: Vec<Vec<f32>>,
    /// Residual stream for the current position `[embedding_dim]`
    pub hidden: Vec<f32>,
    /// Normalized copy of the residual stream `[embedding_dim]`
    pub normed: Vec<f32>,
    /// Query projection `[embedding_dim]`
    pub q: Vec<f32>,
    /// Key projection for the current position `[kv_dim]`
    pub k: Vec<f32>,
    /// Value projection for the current position `[kv_dim]`
    pub v: Vec<f32>,
    /// Attention scores, one `context_length` row per head
    pub att: Vec<f32>,
    /// Concatenated per-head attention results `[embedding_dim]`
    pub attn_out: Vec<f32>,
    /// Output of the attention or FFN down projection, before the residual
    /// add `[embedding_dim]`
    pub proj: Vec<f32>,
    /// Gate branch of the feed-forward block `[ffn_dim]`
    pub ffn_gate: Vec<f32>,
    /// Up branch of the feed-forward block `[ffn_dim]`
    pub ffn_up: Vec<f32>,
    /// Logits over the vocabulary, written by the final projection
    pub logits: Vec<f32>,
    position: usize,
}

impl InferenceState {
    /// Allocate a state sized for `config`
    #[must_use]
    pub fn new(config: &ModelConfig) -> Self {
        let dim = config.embedding_dim;
        let kv_dim = config.kv_dim();
        let cache_len = config.context_length * kv_dim;
        Self {
            key_cache: (0..config.num_layers).map(|_| vec![0.0; cache_len]).collect(),
            value_cache: (0..config.num_layers).map(|_| vec![0.0; cache_len]).collect(),
            hidden: vec![0.0; dim],
            normed: vec![0.0; dim],
            q: vec![0.0; dim],
            k: vec![0.0; kv_dim],
            v: vec![0.0; kv_dim],
            att: vec![0.0; config.num_heads * config.context_length],
            attn_out: vec![0.0; dim],
            proj: vec![0.0; dim],
            ffn_gate: vec![0.0; config.ffn_dim],
            ffn_up: vec![0.0; config.ffn_dim],
            logits: vec![0.0; config.vocab_size],
            position: 0,
        }
    }

    /// Next position to be filled, also the number of cached positions
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Advance past a position whose forward step has completed
    pub fn advance(&mut self) {
        self.position += 1;
    }

    /// Rewind to an empty conversation. Cache contents are left in place;
    /// they are unreachable once the counter is zero.
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

// ============================================================================
// Weights
// ============================================================================

/// Weights for one transformer block
#[derive(Debug, Clone)]
pub struct LayerWeights<'a> {
    /// Attention RMS norm weight, full precision `[embedding_dim]`
    pub attn_norm: Vec<f32>,
    /// Query projection `[embedding_dim x embedding_dim]`
    pub attn_q: QuantizedTensor<'a>,
    /// Key projection `[kv_dim x embedding_dim]`
    pub attn_k: QuantizedTensor<'a>,
    /// Value projection `[kv_dim x embedding_dim]`
    pub attn_v: QuantizedTensor<'a>,
    /// Attention output projection `[embedding_dim x embedding_dim]`
    pub attn_output: QuantizedTensor<'a>,
    /// FFN RMS norm weight, full precision `[embedding_dim]`
    pub ffn_norm: Vec<f32>,
    /// Gate projection `[ffn_dim x embedding_dim]`
    pub ffn_gate: QuantizedTensor<'a>,
    /// Up projection `[ffn_dim x embedding_dim]`
    pub ffn_up: QuantizedTensor<'a>,
    /// Down projection `[embedding_dim x ffn_dim]`
    pub ffn_down: QuantizedTensor<'a>,
}

/// Decoder-only transformer whose weight matrices stay quantized in the
/// mapped checkpoint; only norm vectors are dequantized up front.
///
/// Borrows the mapping that backs its tensor views, so the
/// [`MappedGGUFModel`] must outlive the transformer.
#[derive(Debug, Clone)]
pub struct QuantizedTransformer<'a> {
    /// Hyperparameters resolved from container metadata
    pub config: ModelConfig,
    /// Token embedding table `[vocab_size x embedding_dim]`
    pub token_embedding: QuantizedTensor<'a>,
    /// Transformer blocks in evaluation order
    pub layers: Vec<LayerWeights<'a>>,
    /// Final RMS norm weight, full precision `[embedding_dim]`
    pub output_norm: Vec<f32>,
    /// LM head `[vocab_size x embedding_dim]`; the token embedding when tied
    pub output_weight: QuantizedTensor<'a>,
}

impl<'a> QuantizedTransformer<'a> {
    /// Resolve configuration and wire up every weight tensor from a mapped
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`InferirError::FormatError`] when a required tensor is
    /// missing or its element count disagrees with the configuration.
    pub fn from_mapped(mapped: &'a MappedGGUFModel) -> Result<Self> {
        let config = ModelConfig::from_metadata(&mapped.model)?;
        let dim = config.embedding_dim;
        let kv_dim = config.kv_dim();

        let token_embedding = weight_matrix(mapped, "token_embd.weight", config.vocab_size, dim)?;

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let attn_norm = norm_vector(mapped, &format!("blk.{i}.attn_norm.weight"), dim)?;
            let ffn_norm = norm_vector(mapped, &format!("blk.{i}.ffn_norm.weight"), dim)?;

            let q_name = format!("blk.{i}.attn_q.weight");
            let (attn_q, attn_k, attn_v) = if mapped.model.tensor(&q_name).is_some() {
                (
                    weight_matrix(mapped, &q_name, dim, dim)?,
                    weight_matrix(mapped, &format!("blk.{i}.attn_k.weight"), kv_dim, dim)?,
                    weight_matrix(mapped, &format!("blk.{i}.attn_v.weight"), kv_dim, dim)?,
                )
            } else {
                split_fused_qkv(mapped, i, dim, kv_dim)?
            };

            layers.push(LayerWeights {
                attn_norm,
                attn_q,
                attn_k,
                attn_v,
                attn_output: weight_matrix(mapped, &format!("blk.{i}.attn_output.weight"), dim, dim)?,
                ffn_norm,
                ffn_gate: weight_matrix(mapped, &format!("blk.{i}.ffn_gate.weight"), config.ffn_dim, dim)?,
                ffn_up: weight_matrix(mapped, &format!("blk.{i}.ffn_up.weight"), config.ffn_dim, dim)?,
                ffn_down: weight_matrix(mapped, &format!("blk.{i}.ffn_down.weight"), dim, config.ffn_dim)?,
            });
        }

        let output_norm = norm_vector(mapped, "output_norm.weight", dim)?;
        // Tied embeddings: checkpoints without a separate LM head reuse the
        // token embedding table
        let output_weight = if mapped.model.tensor("output.weight").is_some() {
            weight_matrix(mapped, "output.weight", config.vocab_size, dim)?
        } else {
            token_embedding.clone()
        };

        Ok(Self {
            config,
            token_embedding,
            layers,
            output_norm,
            output_weight,
        })
    }
}

/// Fetch a weight matrix and check its element count against the expected
/// `rows x cols` shape.
fn weight_matrix<'m>(
    mapped: &'m MappedGGUFModel,
    name: &str,
    rows: usize,
    cols: usize,
) -> Result<QuantizedTensor<'m>> {
    let expected = rows.checked_mul(cols).ok_or_else(|| InferirError::FormatError {
        reason: format!("tensor '{name}' shape {rows}x{cols} overflows"),
    })?;
    let tensor = QuantizedTensor::from_view(mapped.tensor_view(name)?);
    if tensor.len() != expected {
        return Err(InferirError::FormatError {
            reason: format!(
                "tensor '{name}' has {} elements, expected {rows}x{cols}",
                tensor.len()
            ),
        });
    }
    Ok(tensor)
}

/// Fetch a norm weight vector and dequantize it up front; norms are tiny
/// and read every step.
fn norm_vector(mapped: &MappedGGUFModel, name: &str, dim: usize) -> Result<Vec<f32>> {
    let tensor = QuantizedTensor::from_view(mapped.tensor_view(name)?);
    if tensor.len() != dim {
        return Err(InferirError::FormatError {
            reason: format!("tensor '{name}' has {} elements, expected {dim}", tensor.len()),
        });
    }
    Ok(tensor.dequantize())
}

/// Split a fused `attn_qkv` matrix into query, key, and value views.
///
/// Row layout is q rows first, then k, then v, as written by llama.cpp
/// conversion tools.
fn split_fused_qkv<'m>(
    mapped: &'m MappedGGUFModel,
    layer: usize,
    dim: usize,
    kv_dim: usize,
) -> Result<(QuantizedTensor<'m>, QuantizedTensor<'m>, QuantizedTensor<'m>)> {
    let name = format!("blk.{layer}.attn_qkv.weight");
    let fused = mapped.tensor_view(&name)?;
    let q_elems = dim.checked_mul(dim).ok_or_else(|| InferirError::FormatError {
        reason: format!("tensor '{name}' shape overflows"),
    })?;
    let kv_elems = kv_dim * dim;
    Ok((
        QuantizedTensor::from_view(fused.subview(0, q_elems)?),
        QuantizedTensor::from_view(fused.subview(q_elems, kv_elems)?),
        QuantizedTensor::from_view(fused.subview(q_elems + kv_elems, kv_elems)?),
    ))
}

// ============================================================================
// Forward pass
// ============================================================================

impl ForwardModel for QuantizedTransformer<'_> {
    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn context_length(&self) -> usize {
        self.config.context_length
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn forward<'s>(
        &self,
        token: u32,
        position: usize,
        state: &'s mut InferenceState,
    ) -> Result<&'s [f32]> {
        let config = &self.config;
        assert!(
            position < config.context_length,
            "position {position} outside context window of {}",
            config.context_length
        );

        let token_idx = token as usize;
        if token_idx >= config.vocab_size {
            return Err(InferirError::InvalidConfiguration(format!(
                "token {token} outside vocabulary of {} entries",
                config.vocab_size
            )));
        }

        let dim = config.embedding_dim;
        let kv_dim = config.kv_dim();
        let head_size = config.head_dim;
        let heads_per_kv = config.num_heads / config.num_kv_heads;
        let score_scale = 1.0 / (head_size as f32).sqrt();
        let seq_len = position + 1;

        self.token_embedding
            .copy_range_into(token_idx * dim, &mut state.hidden);

        for (layer_idx, layer) in self.layers.iter().enumerate() {
            rms_norm(&mut state.normed, &state.hidden, &layer.attn_norm, config.rms_eps);

            matvec(&mut state.q, &layer.attn_q, &state.normed);
            matvec(&mut state.k, &layer.attn_k, &state.normed);
            matvec(&mut state.v, &layer.attn_v, &state.normed);

            apply_rope(&mut state.q, &mut state.k, position, head_size, config.rope_theta);

            let cache_row = position * kv_dim..(position + 1) * kv_dim;
            state.key_cache[layer_idx][cache_row.clone()].copy_from_slice(&state.k);
            state.value_cache[layer_idx][cache_row].copy_from_slice(&state.v);

            // Attention, one head per work unit. Each head owns a disjoint
            // score row and output chunk.
            {
                let keys = &state.key_cache[layer_idx];
                let values = &state.value_cache[layer_idx];
                let q = &state.q;
                let max_context = config.context_length;

                let head_work = |head: usize, scores: &mut [f32], out: &mut [f32]| {
                    let q_head = &q[head * head_size..(head + 1) * head_size];
                    let kv_base = (head / heads_per_kv) * head_size;
                    for t in 0..seq_len {
                        let key_row = &keys[t * kv_dim + kv_base..][..head_size];
                        let mut score = 0.0f32;
                        for j in 0..head_size {
                            score = q_head[j].mul_add(key_row[j], score);
                        }
                        scores[t] = score * score_scale;
                    }
                    softmax_slice(&mut scores[..seq_len]);
                    out.fill(0.0);
                    for t in 0..seq_len {
                        let value_row = &values[t * kv_dim + kv_base..][..head_size];
                        let weight = scores[t];
                        for j in 0..head_size {
                            out[j] = weight.mul_add(value_row[j], out[j]);
                        }
                    }
                };

                if config.num_heads >= PARALLEL_CHUNK_THRESHOLD {
                    state
                        .att
                        .par_chunks_mut(max_context)
                        .zip(state.attn_out.par_chunks_mut(head_size))
                        .enumerate()
                        .for_each(|(head, (scores, out))| head_work(head, scores, out));
                } else {
                    for (head, (scores, out)) in state
                        .att
                        .chunks_mut(max_context)
                        .zip(state.attn_out.chunks_mut(head_size))
                        .enumerate()
                    {
                        head_work(head, scores, out);
                    }
                }
            }

            matvec(&mut state.proj, &layer.attn_output, &state.attn_out);
            for (residual, &delta) in state.hidden.iter_mut().zip(&state.proj) {
                *residual += delta;
            }

            rms_norm(&mut state.normed, &state.hidden, &layer.ffn_norm, config.rms_eps);

            // Gate and up projections are independent
            {
                let gate_out = &mut state.ffn_gate;
                let up_out = &mut state.ffn_up;
                let normed = &state.normed;
                rayon::join(
                    || matvec(gate_out, &layer.ffn_gate, normed),
                    || matvec(up_out, &layer.ffn_up, normed),
                );
            }

            // SwiGLU: silu(gate) * up
            for (gate, &up) in state.ffn_gate.iter_mut().zip(&state.ffn_up) {
                let g = *gate;
                *gate = g / (1.0 + (-g).exp()) * up;
            }

            matvec(&mut state.proj, &layer.ffn_down, &state.ffn_gate);
            for (residual, &delta) in state.hidden.iter_mut().zip(&state.proj) {
                *residual += delta;
            }
        }

        rms_norm(&mut state.normed, &state.hidden, &self.output_norm, config.rms_eps);
        matvec(&mut state.logits, &self.output_weight, &state.normed);
        Ok(&state.logits)
    }
}

// ============================================================================
// Numeric kernels
// ============================================================================

/// Row-parallel matrix-vector product: `out[row] = weight[row, :] . x`
fn matvec(out: &mut [f32], weight: &QuantizedTensor<'_>, x: &[f32]) {
    let in_dim = x.len();
    debug_assert_eq!(weight.len(), out.len() * in_dim);
    parallel::for_each_slot(out, MATVEC_ROWS_PER_TASK, |row, slot| {
        *slot = weight.dot(row * in_dim, x, 0, in_dim);
    });
}

/// Root-mean-square normalization with a learned per-channel weight
#[allow(clippy::cast_precision_loss)]
fn rms_norm(out: &mut [f32], x: &[f32], weight: &[f32], eps: f32) {
    debug_assert_eq!(out.len(), x.len());
    debug_assert_eq!(out.len(), weight.len());
    let mut sum_squares = 0.0f32;
    for &value in x {
        sum_squares = value.mul_add(value, sum_squares);
    }
    let scale = 1.0 / (sum_squares / x.len() as f32 + eps).sqrt();
    for i in 0..out.len() {
        out[i] = weight[i] * (scale * x[i]);
    }
}

/// In-place softmax with max subtraction for stability
fn softmax_slice(values: &mut [f32]) {
    let max = values.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let mut sum = 0.0f32;
    for value in values.iter_mut() {
        *value = (*value - max).exp();
        sum += *value;
    }
    let inv = 1.0 / sum;
    for value in values.iter_mut() {
        *value *= inv;
    }
}

/// Rotate adjacent pairs of query and key lanes by a position-dependent
/// angle. The frequency depends on the lane's offset within its head, so
/// one flat walk covers all heads; key lanes stop at `kv_dim`.
#[allow(clippy::cast_precision_loss)]
fn apply_rope(q: &mut [f32], k: &mut [f32], position: usize, head_size: usize, theta: f32) {
    let pos = position as f32;
    let mut i = 0;
    while i < q.len() {
        let lane = (i % head_size) as f32;
        let freq = theta.powf(-(lane / head_size as f32));
        let (sin, cos) = (pos * freq).sin_cos();
        rotate_pair(q, i, sin, cos);
        if i < k.len() {
            rotate_pair(k, i, sin, cos);
        }
        i += 2;
    }
}

#[inline]
fn rotate_pair(values: &mut [f32], i: usize, sin: f32, cos: f32) {
    let (a, b) = (values[i], values[i + 1]);
    values[i] = a.mul_add(cos, -(b * sin));
    values[i + 1] = a.mul_add(sin, b * cos);
}
