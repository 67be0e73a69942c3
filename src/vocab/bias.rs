//! Additive logit bias.
//!
//! The bias is a dense vector over the whole vocabulary: `0.0` where a token
//! is an allowed continuation word and negative infinity everywhere else.
//! Adding it to raw logits before softmax gives masked tokens exactly zero
//! probability while leaving the relative logits of allowed tokens intact.
//!
//! ```text
//! vocab:   Ġcat  Ġthe  ing  Ġred  ,
//! allowed:  yes   no   no   yes   no
//! bias:     0.0  -inf -inf  0.0  -inf
//! ```
//!
//! Logits are always upcast to f32 before the bias is applied, so the mask
//! behaves the same whether the model runs in f32 or f16.

use std::collections::HashMap;

use tracing::info;

use super::allow_list::VocabularyAllowList;
use crate::error::{Error, Result};

/// Value used for masked positions.
pub const MASKED: f32 = f32::NEG_INFINITY;

/// Dense additive bias over the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitBias {
    values: Vec<f32>,
    allowed: usize,
}

impl LogitBias {
    /// Builds the bias for a vocabulary of `vocab_size` ids.
    ///
    /// Entries of `vocab` whose id falls outside `vocab_size` are ignored.
    pub fn build(
        vocab: &HashMap<String, u32>,
        allow_list: &VocabularyAllowList,
        vocab_size: usize,
    ) -> Self {
        let mut values = vec![MASKED; vocab_size];
        let mut allowed = 0usize;
        for id in allow_list.token_ids(vocab) {
            if let Some(slot) = values.get_mut(id as usize) {
                *slot = 0.0;
                allowed += 1;
            }
        }
        info!(
            words = allowed,
            vocab_size, "prompt expansion vocabulary built"
        );
        Self { values, allowed }
    }

    /// Number of vocabulary positions.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bias covers no positions.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of positions left unmasked.
    pub fn allowed_count(&self) -> usize {
        self.allowed
    }

    /// Whether `id` is an allowed continuation token.
    pub fn is_allowed(&self, id: u32) -> bool {
        self.values.get(id as usize).is_some_and(|&v| v == 0.0)
    }

    /// Raw bias values.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Adds the bias to `logits` in place.
    pub fn apply(&self, logits: &mut [f32]) -> Result<()> {
        if logits.len() != self.values.len() {
            return Err(Error::ShapeMismatch {
                expected: self.values.len(),
                actual: logits.len(),
            });
        }
        for (logit, bias) in logits.iter_mut().zip(&self.values) {
            *logit += bias;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> HashMap<String, u32> {
        [("Ġcat", 0), ("Ġthe", 1), ("ing", 2), ("Ġred", 3), (",", 4), ("Ġbig", 9)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_build_masks_everything_else() {
        let list = VocabularyAllowList::from_words(["cat", "red", "big"]);
        let bias = LogitBias::build(&vocab(), &list, 5);

        assert_eq!(bias.len(), 5);
        // "Ġbig" has id 9, outside the vocabulary size.
        assert_eq!(bias.allowed_count(), 2);
        assert_eq!(bias.as_slice()[0], 0.0);
        assert_eq!(bias.as_slice()[3], 0.0);
        for id in [1usize, 2, 4] {
            assert_eq!(bias.as_slice()[id], f32::NEG_INFINITY);
        }
    }

    #[test]
    fn test_apply_keeps_relative_logits() {
        let list = VocabularyAllowList::from_words(["cat", "red"]);
        let bias = LogitBias::build(&vocab(), &list, 5);
        let mut logits = vec![1.5f32, 9.0, 9.0, -0.5, 2.0];
        bias.apply(&mut logits).unwrap();

        assert_eq!(logits[0], 1.5);
        assert_eq!(logits[3], -0.5);
        assert!(logits[1].is_infinite() && logits[1] < 0.0);
    }

    #[test]
    fn test_apply_shape_mismatch() {
        let bias = LogitBias::build(&vocab(), &VocabularyAllowList::default(), 5);
        let mut logits = vec![0.0f32; 4];
        assert!(matches!(
            bias.apply(&mut logits),
            Err(Error::ShapeMismatch { expected: 5, actual: 4 })
        ));
    }
}
