//! Error types for model loading and inference

use thiserror::Error;

/// Errors raised while loading a container or driving generation
#[derive(Debug, Error)]
pub enum InferirError {
    /// Malformed container: bad magic, version, offset, alignment, or
    /// duplicate names. Always fatal; no partial model is returned.
    #[error("Format error: {reason}")]
    FormatError {
        /// What was malformed and where
        reason: String,
    },

    /// Underlying I/O failure (short read, unreadable file)
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the failed operation
        message: String,
    },

    /// Unknown metadata or tensor element type tag
    #[error("Unsupported type tag {type_id} in {context}")]
    UnsupportedType {
        /// The wire tag that was not recognized
        type_id: u32,
        /// Where the tag was encountered
        context: String,
    },

    /// Invalid generation options, rejected before generation starts
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Prompt cannot fit the model's context window at all
    #[error("Context limit exceeded: {provided} tokens, maximum {maximum}")]
    ContextLimitExceeded {
        /// Tokens supplied by the caller
        provided: usize,
        /// Context length of the loaded model
        maximum: usize,
    },
}

/// Convenience result type used throughout the crate
pub type Result<T> = std::result::Result<T, InferirError>;
