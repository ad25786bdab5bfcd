//! Autoregressive generation loop
//!
//! Drives repeated forward-pass + sample + append steps against a
//! [`ForwardModel`]. The loop is a three-phase state machine:
//!
//! 1. Prefill: feed every prompt token except the last through the model to
//!    warm the key/value cache. No sampling; the response has not started.
//! 2. Decode: forward the previous token, sample the next from the logits,
//!    append, repeat. Strictly sequential per position.
//! 3. Stopped: a stop token was sampled, the token budget ran out, the
//!    context window filled up, or the sink requested early termination.
//!
//! Emitted tokens flow through a [`TokenSink`]: a plain closure for
//! synchronous streaming, or [`ChannelSink`] to drain them through a bounded
//! queue from another thread. Emission order is the generation order either
//! way.

use std::sync::mpsc::{Receiver, SyncSender};

use serde::{Deserialize, Serialize};

use crate::error::{InferirError, Result};
use crate::sampler::TokenSampler;
use crate::transformer::InferenceState;

// ============================================================================
// Options
// ============================================================================

/// Knobs for one generation session
///
/// Defaults favor mostly-deterministic output: low temperature with a wide
/// nucleus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Softmax temperature; 0 selects greedy decoding
    pub temperature: f32,
    /// Nucleus mass threshold; values outside (0, 1) disable nucleus
    /// restriction
    pub top_p: f32,
    /// Seed for the sampler's random generator
    pub seed: u64,
    /// Maximum number of tokens to emit
    pub max_tokens: usize,
    /// Print tokens as they are produced rather than all at once
    pub stream: bool,
    /// Also report prompt tokens through the sink during prefill
    pub echo: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.95,
            seed: 42,
            max_tokens: 512,
            stream: true,
            echo: false,
        }
    }
}

impl GenerationOptions {
    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the nucleus mass threshold
    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Set the random seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the token budget
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Toggle streaming output
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Toggle prompt echo
    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Reject option combinations that cannot drive a generation.
    ///
    /// # Errors
    ///
    /// Returns [`InferirError::InvalidConfiguration`] for a negative or NaN
    /// temperature, a top-p outside [0, 1], or a zero token budget.
    pub fn validate(&self) -> Result<()> {
        if self.temperature.is_nan() || self.temperature < 0.0 {
            return Err(InferirError::InvalidConfiguration(format!(
                "temperature must be non-negative, got {}",
                self.temperature
            )));
        }
        if self.top_p.is_nan() || !(0.0..=1.0).contains(&self.top_p) {
            return Err(InferirError::InvalidConfiguration(format!(
                "top-p must lie in [0, 1], got {}",
                self.top_p
            )));
        }
        if self.max_tokens == 0 {
            return Err(InferirError::InvalidConfiguration(
                "max-tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the sampler this option set selects (see the selection policy
    /// on [`TokenSampler::new`]).
    #[must_use]
    pub fn build_sampler(&self) -> TokenSampler {
        TokenSampler::new(self.temperature, self.top_p, self.seed)
    }
}

// ============================================================================
// Termination
// ============================================================================

/// Why a generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A stop token was sampled; it is the last entry of the output
    StopToken(u32),
    /// The configured token budget was reached
    MaxTokens,
    /// The context window filled up mid-decode
    ContextExhausted,
    /// The sink requested early termination
    Interrupted,
}

/// Result of one generation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Generated tokens in emission order, including the stop token if one
    /// was hit
    pub tokens: Vec<u32>,
    /// Terminal condition of the loop
    pub reason: StopReason,
}

impl GenerationOutput {
    /// Number of tokens actually produced
    #[must_use]
    pub fn count(&self) -> usize {
        self.tokens.len()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Consumer of emitted tokens.
///
/// [`accept`](Self::accept) is called once per emitted token, prompt echoes
/// included, in emission order. Returning `false` asks the loop to stop
/// after the current token.
pub trait TokenSink {
    /// Receive one token; return `false` to request early termination
    fn accept(&mut self, token: u32) -> bool;
}

impl<F: FnMut(u32) -> bool> TokenSink for F {
    fn accept(&mut self, token: u32) -> bool {
        self(token)
    }
}

/// Sink that forwards tokens into a bounded channel for consumption from
/// another thread.
///
/// `send` blocks when the queue is full, so a slow consumer backpressures
/// the loop instead of losing tokens. A dropped receiver reads as an
/// early-stop request.
#[derive(Debug)]
pub struct ChannelSink {
    sender: SyncSender<u32>,
}

impl ChannelSink {
    /// Wrap an existing bounded sender
    #[must_use]
    pub fn new(sender: SyncSender<u32>) -> Self {
        Self { sender }
    }

    /// Create a sink and its receiving end with the given queue capacity
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<u32>) {
        let (sender, receiver) = std::sync::mpsc::sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl TokenSink for ChannelSink {
    fn accept(&mut self, token: u32) -> bool {
        self.sender.send(token).is_ok()
    }
}

// ============================================================================
// Forward contract
// ============================================================================

/// One forward step of a causal language model.
///
/// Implementations consume the current token at the current position,
/// update the key/value cache inside `state`, and expose logits over the
/// vocabulary. The position counter itself is advanced by the caller, not
/// by `forward`.
pub trait ForwardModel {
    /// Number of entries in the logit vector
    fn vocab_size(&self) -> usize;

    /// Maximum sequence length the key/value cache can hold
    fn context_length(&self) -> usize;

    /// Run one forward step and return the logits, which borrow scratch
    /// space inside `state`.
    ///
    /// # Errors
    ///
    /// Propagates failures reading mapped weights.
    fn forward<'a>(
        &self,
        token: u32,
        position: usize,
        state: &'a mut InferenceState,
    ) -> Result<&'a [f32]>;
}

// ============================================================================
// The loop
// ============================================================================

/// Generate a continuation of `prompt`, reporting each emitted token to
/// `sink`.
///
/// Generation begins at the state's current position, so a warm state
/// continues its conversation. The returned output holds the generated
/// tokens (prompt excluded) and the terminal condition. The stop token, if
/// one was sampled, stays in the output; presentation layers strip it,
/// history layers keep it.
///
/// # Errors
///
/// Returns [`InferirError::InvalidConfiguration`] for invalid options or an
/// empty prompt, [`InferirError::ContextLimitExceeded`] when the prompt
/// cannot fit the remaining context, and propagates forward-pass failures.
/// Running out of context mid-decode is not an error; it is reported as
/// [`StopReason::ContextExhausted`].
#[allow(clippy::cast_possible_truncation)] // vocabulary indices fit in u32
pub fn generate<M, S>(
    model: &M,
    state: &mut InferenceState,
    prompt: &[u32],
    stop_tokens: &[u32],
    options: &GenerationOptions,
    sampler: &mut TokenSampler,
    sink: &mut S,
) -> Result<GenerationOutput>
where
    M: ForwardModel + ?Sized,
    S: TokenSink + ?Sized,
{
    options.validate()?;
    if prompt.is_empty() {
        return Err(InferirError::InvalidConfiguration(
            "prompt must contain at least one token".to_string(),
        ));
    }

    let max_context = model.context_length();
    let needed = state.position() + prompt.len();
    if needed > max_context {
        return Err(InferirError::ContextLimitExceeded {
            provided: needed,
            maximum: max_context,
        });
    }

    let interrupted = |tokens: Vec<u32>| GenerationOutput {
        tokens,
        reason: StopReason::Interrupted,
    };

    // Prefill: warm the cache on every prompt token but the last
    for &token in &prompt[..prompt.len() - 1] {
        model.forward(token, state.position(), state)?;
        state.advance();
        if options.echo && !sink.accept(token) {
            return Ok(interrupted(Vec::new()));
        }
    }

    // The last prompt token seeds the first decode step
    let mut current = prompt[prompt.len() - 1];
    if options.echo && !sink.accept(current) {
        return Ok(interrupted(Vec::new()));
    }

    let mut generated = Vec::with_capacity(options.max_tokens.min(512));
    let reason = loop {
        if generated.len() >= options.max_tokens {
            break StopReason::MaxTokens;
        }
        if state.position() >= max_context {
            break StopReason::ContextExhausted;
        }

        let logits = model.forward(current, state.position(), state)?;
        let token = sampler.sample(logits) as u32;
        state.advance();

        generated.push(token);
        current = token;
        let keep_going = sink.accept(token);

        if stop_tokens.contains(&token) {
            break StopReason::StopToken(token);
        }
        if !keep_going {
            break StopReason::Interrupted;
        }
    };

    Ok(GenerationOutput {
        tokens: generated,
        reason,
    })
}
