//! Tokenizer seam.
//!
//! The engine needs four things from a tokenizer: encoding without special
//! tokens, decoding with special tokens skipped, the surface-form vocabulary
//! for building the bias, and single-token lookup for the separator and EOS.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Tokenizer operations used by the expansion engine.
pub trait PromptTokenizer {
    /// Encodes text without adding special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decodes ids, skipping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Surface form to id, including added tokens.
    fn vocab(&self) -> HashMap<String, u32>;

    /// Id of a single surface form.
    fn token_to_id(&self, token: &str) -> Option<u32>;
}

impl PromptTokenizer for tokenizers::Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = (**self)
            .encode(text, false)
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        (**self)
            .decode(ids, true)
            .map_err(|e| Error::Tokenization(e.to_string()))
    }

    fn vocab(&self) -> HashMap<String, u32> {
        (**self).get_vocab(true)
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        (**self).token_to_id(token)
    }
}
