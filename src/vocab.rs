//! Vocabulary container and chat-format interface
//!
//! The generation core treats tokenization as an external collaborator: it
//! consumes and produces token ids, nothing else. This module holds the two
//! pieces the core does own:
//!
//! - [`Vocabulary`]: the ordered token table from checkpoint metadata, with
//!   per-token scores and a reverse string-to-id map built once at load.
//! - [`ChatFormat`]: the trait a prompt-template implementation fills in
//!   (encode a role-tagged message, decode ids back to text, name the stop
//!   tokens).
//!
//! [`ByteFallbackFormat`] is a deliberately tiny `ChatFormat` where ids
//! 0-255 are raw bytes plus four specials, enough to drive the demo binary
//! and tests without a BPE implementation.

use std::collections::{HashMap, HashSet};

use crate::error::{InferirError, Result};
use crate::gguf::GGUFModel;

// ============================================================================
// Vocabulary
// ============================================================================

/// Ordered token strings plus scores, with reverse lookup.
///
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    scores: Vec<f32>,
    reverse: HashMap<String, u32>,
}

impl Vocabulary {
    /// Build a vocabulary, rejecting empty or duplicate token strings.
    ///
    /// # Errors
    ///
    /// Returns [`InferirError::FormatError`] when `tokens` and `scores`
    /// disagree in length, a token is empty, or a token repeats.
    #[allow(clippy::cast_possible_truncation)] // length guarded below
    pub fn new(tokens: Vec<String>, scores: Vec<f32>) -> Result<Self> {
        if tokens.len() != scores.len() {
            return Err(InferirError::FormatError {
                reason: format!(
                    "vocabulary has {} tokens but {} scores",
                    tokens.len(),
                    scores.len()
                ),
            });
        }
        if u32::try_from(tokens.len()).is_err() {
            return Err(InferirError::FormatError {
                reason: format!("vocabulary of {} tokens exceeds id range", tokens.len()),
            });
        }
        let mut reverse = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            if token.is_empty() {
                return Err(InferirError::FormatError {
                    reason: format!("vocabulary token {i} is empty"),
                });
            }
            if reverse.insert(token.clone(), i as u32).is_some() {
                return Err(InferirError::FormatError {
                    reason: format!("duplicate vocabulary token '{token}'"),
                });
            }
        }
        Ok(Self {
            tokens,
            scores,
            reverse,
        })
    }

    /// Read the token table from `tokenizer.ggml.tokens` (and scores from
    /// `tokenizer.ggml.scores` when present).
    ///
    /// Returns `Ok(None)` for checkpoints that carry no tokenizer metadata.
    ///
    /// # Errors
    ///
    /// Returns [`InferirError::FormatError`] when the metadata is present
    /// but malformed.
    pub fn from_metadata(model: &GGUFModel) -> Result<Option<Self>> {
        let Some(tokens_value) = model.metadata_value("tokenizer.ggml.tokens") else {
            return Ok(None);
        };
        let entries = tokens_value
            .as_array()
            .ok_or_else(|| InferirError::FormatError {
                reason: "tokenizer.ggml.tokens is not an array".to_string(),
            })?;

        let mut tokens = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let text = entry.as_str().ok_or_else(|| InferirError::FormatError {
                reason: format!("tokenizer.ggml.tokens[{i}] is not a string"),
            })?;
            tokens.push(text.to_string());
        }

        let scores = match model.metadata_value("tokenizer.ggml.scores") {
            Some(value) => {
                let entries = value.as_array().ok_or_else(|| InferirError::FormatError {
                    reason: "tokenizer.ggml.scores is not an array".to_string(),
                })?;
                let mut scores = Vec::with_capacity(entries.len());
                for (i, entry) in entries.iter().enumerate() {
                    let score = entry.as_f32().ok_or_else(|| InferirError::FormatError {
                        reason: format!("tokenizer.ggml.scores[{i}] is not numeric"),
                    })?;
                    scores.push(score);
                }
                scores
            },
            None => vec![0.0; tokens.len()],
        };

        Self::new(tokens, scores).map(Some)
    }

    /// Number of tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True for a vocabulary with no tokens
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token string for an id
    #[must_use]
    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// Score for an id
    #[must_use]
    pub fn score(&self, id: u32) -> Option<f32> {
        self.scores.get(id as usize).copied()
    }

    /// Id for an exact token string
    #[must_use]
    pub fn index_of(&self, token: &str) -> Option<u32> {
        self.reverse.get(token).copied()
    }
}

// ============================================================================
// Chat format
// ============================================================================

/// Prompt-template collaborator: turns role-tagged messages into token ids
/// and back.
///
/// The generation core never inspects these ids; it only forwards them.
pub trait ChatFormat {
    /// Encode one complete message: header, content, end-of-turn
    fn encode_message(&self, role: &str, text: &str) -> Vec<u32>;

    /// Encode just the role header, used to cue the assistant's reply
    fn encode_header(&self, role: &str) -> Vec<u32>;

    /// Decode ids back to display text
    fn decode(&self, tokens: &[u32]) -> String;

    /// Ids that terminate a turn
    fn stop_tokens(&self) -> HashSet<u32>;

    /// Id that opens a conversation
    fn begin_of_text(&self) -> u32;
}

/// Byte-level chat format: ids 0-255 are raw bytes, followed by four
/// special ids. No external tokenizer needed, at the cost of one token per
/// byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteFallbackFormat;

impl ByteFallbackFormat {
    /// Opens a conversation
    pub const BEGIN_OF_TEXT: u32 = 256;
    /// Opens a role header
    pub const START_HEADER: u32 = 257;
    /// Closes a role header
    pub const END_HEADER: u32 = 258;
    /// Terminates a turn; the format's only stop token
    pub const END_OF_TURN: u32 = 259;
    /// Smallest model vocabulary this format can address
    pub const VOCAB_SIZE: usize = 260;

    fn push_bytes(tokens: &mut Vec<u32>, text: &str) {
        tokens.extend(text.bytes().map(u32::from));
    }
}

impl ChatFormat for ByteFallbackFormat {
    fn encode_message(&self, role: &str, text: &str) -> Vec<u32> {
        let mut tokens = self.encode_header(role);
        Self::push_bytes(&mut tokens, text);
        tokens.push(Self::END_OF_TURN);
        tokens
    }

    fn encode_header(&self, role: &str) -> Vec<u32> {
        let mut tokens = vec![Self::START_HEADER];
        Self::push_bytes(&mut tokens, role);
        tokens.push(Self::END_HEADER);
        Self::push_bytes(&mut tokens, "\n\n");
        tokens
    }

    fn decode(&self, tokens: &[u32]) -> String {
        let bytes: Vec<u8> = tokens
            .iter()
            .filter_map(|&token| u8::try_from(token).ok())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn stop_tokens(&self) -> HashSet<u32> {
        HashSet::from([Self::END_OF_TURN])
    }

    fn begin_of_text(&self) -> u32 {
        Self::BEGIN_OF_TEXT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::types::GGUF_MAGIC;

    fn push_string(data: &mut Vec<u8>, s: &str) {
        data.extend_from_slice(&(s.len() as u64).to_le_bytes());
        data.extend_from_slice(s.as_bytes());
    }

    fn push_kv_str_array(data: &mut Vec<u8>, key: &str, values: &[&str]) {
        push_string(data, key);
        data.extend_from_slice(&9u32.to_le_bytes());
        data.extend_from_slice(&8u32.to_le_bytes()); // element type: string
        data.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for value in values {
            push_string(data, value);
        }
    }

    fn push_kv_f32_array(data: &mut Vec<u8>, key: &str, values: &[f32]) {
        push_string(data, key);
        data.extend_from_slice(&9u32.to_le_bytes());
        data.extend_from_slice(&6u32.to_le_bytes()); // element type: f32
        data.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for value in values {
            data.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn container_with_metadata(entries: u64, fill: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&entries.to_le_bytes());
        fill(&mut data);
        data
    }

    #[test]
    fn test_vocabulary_lookup() {
        let vocab = Vocabulary::new(
            vec!["hello".to_string(), "world".to_string()],
            vec![0.5, -1.0],
        )
        .unwrap();
        assert_eq!(vocab.len(), 2);
        assert!(!vocab.is_empty());
        assert_eq!(vocab.token(0), Some("hello"));
        assert_eq!(vocab.token(2), None);
        assert_eq!(vocab.score(1), Some(-1.0));
        assert_eq!(vocab.index_of("world"), Some(1));
        assert_eq!(vocab.index_of("missing"), None);
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let err = Vocabulary::new(
            vec!["a".to_string(), "a".to_string()],
            vec![0.0, 0.0],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_token_rejected() {
        let err = Vocabulary::new(vec![String::new()], vec![0.0]).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_score_length_mismatch_rejected() {
        let err = Vocabulary::new(vec!["a".to_string()], vec![0.0, 1.0]).unwrap_err();
        assert!(err.to_string().contains("scores"));
    }

    #[test]
    fn test_from_metadata_reads_tokens_and_scores() {
        let data = container_with_metadata(2, |data| {
            push_kv_str_array(data, "tokenizer.ggml.tokens", &["x", "y", "z"]);
            push_kv_f32_array(data, "tokenizer.ggml.scores", &[1.0, 2.0, 3.0]);
        });
        let model = GGUFModel::from_bytes(&data).unwrap();
        let vocab = Vocabulary::from_metadata(&model).unwrap().unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.token(2), Some("z"));
        assert_eq!(vocab.score(0), Some(1.0));
    }

    #[test]
    fn test_from_metadata_defaults_scores() {
        let data = container_with_metadata(1, |data| {
            push_kv_str_array(data, "tokenizer.ggml.tokens", &["x", "y"]);
        });
        let model = GGUFModel::from_bytes(&data).unwrap();
        let vocab = Vocabulary::from_metadata(&model).unwrap().unwrap();
        assert_eq!(vocab.score(1), Some(0.0));
    }

    #[test]
    fn test_from_metadata_absent() {
        let data = container_with_metadata(0, |_| {});
        let model = GGUFModel::from_bytes(&data).unwrap();
        assert!(Vocabulary::from_metadata(&model).unwrap().is_none());
    }

    #[test]
    fn test_byte_format_message_layout() {
        let format = ByteFallbackFormat;
        let tokens = format.encode_message("user", "hi");
        assert_eq!(tokens[0], ByteFallbackFormat::START_HEADER);
        assert_eq!(*tokens.last().unwrap(), ByteFallbackFormat::END_OF_TURN);
        // Header bytes spell the role
        assert_eq!(format.decode(&tokens), "user\n\nhi");
    }

    #[test]
    fn test_byte_format_decode_skips_specials() {
        let format = ByteFallbackFormat;
        let tokens = vec![
            ByteFallbackFormat::BEGIN_OF_TEXT,
            u32::from(b'o'),
            u32::from(b'k'),
            ByteFallbackFormat::END_OF_TURN,
        ];
        assert_eq!(format.decode(&tokens), "ok");
    }

    #[test]
    fn test_byte_format_multibyte_round_trip() {
        let format = ByteFallbackFormat;
        let text = "héllo ✓";
        let mut tokens = Vec::new();
        ByteFallbackFormat::push_bytes(&mut tokens, text);
        assert_eq!(format.decode(&tokens), text);
    }

    #[test]
    fn test_byte_format_stop_tokens() {
        let format = ByteFallbackFormat;
        let stops = format.stop_tokens();
        assert!(stops.contains(&ByteFallbackFormat::END_OF_TURN));
        assert_eq!(stops.len(), 1);
        assert_eq!(format.begin_of_text(), ByteFallbackFormat::BEGIN_OF_TEXT);
    }
}
