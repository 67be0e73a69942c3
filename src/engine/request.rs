//! Expansion requests and results.

use rand::Rng;

use crate::text::{remove_empty_str, safe_str};

/// Host seeds are folded into `[0, HOST_SEED_LIMIT)`.
pub const HOST_SEED_LIMIT: u64 = 1 << 30;

/// A prompt to expand together with its seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionRequest {
    /// Input prompt.
    pub prompt: String,
    /// Caller seed; the engine reduces it further.
    pub seed: u64,
}

impl ExpansionRequest {
    /// Creates a request as-is.
    pub fn new(prompt: impl Into<String>, seed: u64) -> Self {
        Self {
            prompt: prompt.into(),
            seed,
        }
    }

    /// Normalizes host inputs.
    ///
    /// A missing seed is drawn from `[1, HOST_SEED_LIMIT]` using `rng`. A
    /// negative seed is negated. The result is taken modulo
    /// `HOST_SEED_LIMIT`. The text is sanitized; an empty result stays empty.
    pub fn from_host<R: Rng + ?Sized>(text: &str, seed: Option<i64>, rng: &mut R) -> Self {
        let seed = match seed {
            Some(seed) => seed.unsigned_abs(),
            None => rng.gen_range(1..=HOST_SEED_LIMIT),
        } % HOST_SEED_LIMIT;

        let prompt = remove_empty_str(vec![safe_str(text)], "")
            .into_iter()
            .next()
            .unwrap_or_default();

        Self { prompt, seed }
    }
}

/// Output of one expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionResult {
    /// Expanded prompt.
    pub text: String,
    /// Seed actually used for sampling.
    pub seed: u64,
}

impl ExpansionResult {
    /// The generated continuation after `prompt`, without the leading separator.
    ///
    /// Empty when nothing was added.
    pub fn suffix(&self, prompt: &str) -> &str {
        self.text
            .strip_prefix(prompt)
            .unwrap_or(&self.text)
            .trim_start_matches([',', ' '])
    }
}
