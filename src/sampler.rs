//! Token sampling strategies
//!
//! Three strategies behind one contract: pick an index from a probability
//! distribution over the vocabulary.
//!
//! - `Greedy`: argmax, deterministic
//! - `Categorical`: one uniform draw walked through the running sum
//! - `NucleusTopP`: restrict to the smallest prefix of the descending
//!   distribution whose mass reaches `p`, renormalize, then draw
//!   (Holtzman et al. (2020) "The Curious Case of Neural Text Degeneration")
//!
//! [`TokenSampler`] wraps strategy selection and the logits-to-probabilities
//! pipeline: temperature 0 is always greedy over raw logits; otherwise the
//! logits are scaled by `1/temperature` and softmaxed before sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tensor::QuantizedTensor;

// ============================================================================
// Sampler variants
// ============================================================================

/// Sampling strategy over an already-normalized distribution
#[derive(Debug)]
pub enum Sampler {
    /// Always the most probable token
    Greedy,
    /// Proportional to probability
    Categorical {
        /// Seeded generator owned by this session
        rng: StdRng,
    },
    /// Proportional within the top-`p` nucleus
    NucleusTopP {
        /// Seeded generator owned by this session
        rng: StdRng,
        /// Cumulative mass threshold in (0, 1)
        p: f32,
    },
}

impl Sampler {
    /// Pick a token index from `probabilities`, which must sum to 1.0 over
    /// the full slice.
    ///
    /// # Panics
    ///
    /// Panics on an empty distribution.
    pub fn sample_token(&mut self, probabilities: &[f32]) -> usize {
        assert!(!probabilities.is_empty(), "cannot sample from an empty distribution");
        match self {
            Self::Greedy => {
                let mut best = 0;
                let mut best_prob = f32::NEG_INFINITY;
                for (i, &p) in probabilities.iter().enumerate() {
                    if p > best_prob {
                        best = i;
                        best_prob = p;
                    }
                }
                best
            },
            Self::Categorical { rng } => {
                let draw = rng.gen_range(0.0..1.0);
                walk_distribution(probabilities, draw)
            },
            Self::NucleusTopP { rng, p } => {
                let draw = rng.gen_range(0.0..1.0);
                sample_nucleus(probabilities, *p, draw)
            },
        }
    }
}

/// First index where the running sum exceeds `draw`.
///
/// Rounding can leave the accumulated sum fractionally below 1.0, in which
/// case the last index is returned rather than walking off the end.
fn walk_distribution(probabilities: &[f32], draw: f32) -> usize {
    let mut cumulative = 0.0f32;
    for (i, &p) in probabilities.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return i;
        }
    }
    probabilities.len() - 1
}

/// Nucleus restriction: smallest descending-probability prefix with mass
/// >= `p`, renormalized, then a categorical walk over it.
fn sample_nucleus(probabilities: &[f32], p: f32, draw: f32) -> usize {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    // Stable sort keeps equal probabilities in original index order
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut cutoff = indexed.len();
    let mut mass = 0.0f32;
    for (i, &(_, prob)) in indexed.iter().enumerate() {
        mass += prob;
        if mass >= p {
            cutoff = i + 1;
            break;
        }
    }

    let nucleus = &indexed[..cutoff];
    let nucleus_mass: f32 = nucleus.iter().map(|&(_, prob)| prob).sum();
    let renormalized: Vec<f32> = nucleus.iter().map(|&(_, prob)| prob / nucleus_mass).collect();
    nucleus[walk_distribution(&renormalized, draw)].0
}

// ============================================================================
// TokenSampler - selection policy and logits pipeline
// ============================================================================

/// Strategy selection plus the logits-to-distribution pipeline
///
/// Constructed once per generation session; the seeded generator makes a
/// session with identical inputs reproduce identical output.
#[derive(Debug)]
pub struct TokenSampler {
    temperature: f32,
    inner: Sampler,
}

impl TokenSampler {
    /// Select a strategy for the given knobs.
    ///
    /// Temperature 0 selects `Greedy` unconditionally, ignoring `top_p`.
    /// Positive temperature selects `NucleusTopP` when `top_p` lies strictly
    /// inside (0, 1), else `Categorical`.
    ///
    /// # Panics
    ///
    /// Panics on negative temperature; reject it at the options layer first.
    #[must_use]
    pub fn new(temperature: f32, top_p: f32, seed: u64) -> Self {
        assert!(temperature >= 0.0, "temperature must be non-negative");
        let inner = if temperature == 0.0 {
            Sampler::Greedy
        } else if top_p > 0.0 && top_p < 1.0 {
            Sampler::NucleusTopP {
                rng: StdRng::seed_from_u64(seed),
                p: top_p,
            }
        } else {
            Sampler::Categorical {
                rng: StdRng::seed_from_u64(seed),
            }
        };
        Self { temperature, inner }
    }

    /// Pick the next token from raw logits.
    ///
    /// Greedy reads the logits directly; stochastic strategies see them
    /// scaled by `1/temperature` and softmaxed.
    ///
    /// # Panics
    ///
    /// Panics on empty logits.
    pub fn sample(&mut self, logits: &[f32]) -> usize {
        assert!(!logits.is_empty(), "cannot sample from empty logits");
        if matches!(self.inner, Sampler::Greedy) {
            return self.inner.sample_token(logits);
        }

        let n = logits.len();
        let mut probs = QuantizedTensor::from_f32(logits.to_vec());
        probs.scale_range(0, n, 1.0 / self.temperature);
        probs.softmax_range(0, n);
        self.inner.sample_token(probs.as_slice())
    }
}
