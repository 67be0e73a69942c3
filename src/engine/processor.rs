//! Logits processing for constrained decoding.
//!
//! Applied to the raw next-token logits at every step, in order:
//!
//! 1. add the vocabulary bias (non-allowed tokens become `-inf`)
//! 2. mask every id already present in the sequence (no repeats)
//! 3. restore the separator to its raw logit
//!
//! Step 3 runs last so the separator can be emitted any number of times
//! and is never affected by the bias.

use crate::error::{Error, Result};
use crate::vocab::bias::{LogitBias, MASKED};

/// Constrained-vocabulary, no-repeat logits processor.
#[derive(Debug, Clone, Copy)]
pub struct ConstrainedLogits<'a> {
    bias: &'a LogitBias,
    separator: u32,
}

impl<'a> ConstrainedLogits<'a> {
    /// Creates a processor over `bias` with `separator` exempt.
    pub fn new(bias: &'a LogitBias, separator: u32) -> Self {
        Self { bias, separator }
    }

    /// Separator token id.
    pub fn separator(&self) -> u32 {
        self.separator
    }

    /// Rewrites `logits` in place for the current `sequence`.
    pub fn apply(&self, logits: &mut [f32], sequence: &[u32]) -> Result<()> {
        let separator_logit = logits
            .get(self.separator as usize)
            .copied()
            .ok_or(Error::ShapeMismatch {
                expected: self.separator as usize + 1,
                actual: logits.len(),
            })?;

        self.bias.apply(logits)?;

        for &id in sequence {
            if let Some(logit) = logits.get_mut(id as usize) {
                *logit = MASKED;
            }
        }

        logits[self.separator as usize] = separator_logit;
        Ok(())
    }
}
