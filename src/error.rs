//! Error types for prompt-expansion.

use thiserror::Error;

/// Result type alias for prompt-expansion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for prompt-expansion.
#[derive(Error, Debug)]
pub enum Error {
    /// A required resource (tokenizer, checkpoint, word list) is missing or unreadable.
    #[error("failed to load resource: {0}")]
    ResourceLoad(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Logits and bias vector disagree on vocabulary size.
    #[error("shape mismatch: expected {expected} logits, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// The token budget does not fit in the model's position window.
    #[error("sequence of {requested} tokens exceeds the model window of {max_positions}")]
    ContextOverflow {
        requested: usize,
        max_positions: usize,
    },

    /// No token was eligible for sampling.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Device placement failed.
    #[error("device error: {0}")]
    Device(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
