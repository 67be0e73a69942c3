//! Token sampling.
//!
//! ## Sampling Pipeline
//!
//! ```text
//! Masked logits [vocab_size]
//!     │
//!     ▼ Temperature scaling (0 = greedy)
//! Logits / temperature
//!     │
//!     ▼ Top-k filtering
//! Keep top k tokens
//!     │
//!     ▼ Softmax
//! Probabilities
//!     │
//!     ▼ Weighted sample with the sampler's own RNG
//! Selected token
//! ```
//!
//! Masked tokens carry negative infinity and get probability zero. At
//! least one finite logit must remain.

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::SamplingConfig;
use crate::error::{Error, Result};

/// Token sampler owning a seeded random number generator.
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Temperature for scaling logits.
    temperature: f32,
    /// Top-k value (0 = disabled).
    top_k: usize,
    /// Random number generator.
    rng: StdRng,
}

impl Sampler {
    /// Creates a sampler with a specific seed for reproducibility.
    pub fn with_seed(config: &SamplingConfig, seed: u64) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Samples one token id from 1D logits.
    pub fn sample(&mut self, logits: &[f32]) -> Result<u32> {
        if logits.is_empty() {
            return Err(Error::Sampling("empty logits".into()));
        }

        if self.temperature == 0.0 {
            return self.argmax(logits);
        }

        let mut candidates: Vec<(usize, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &v)| (i, v / self.temperature))
            .collect();

        if self.top_k > 0 && self.top_k < candidates.len() {
            candidates = Self::apply_top_k(candidates, self.top_k);
        }

        let probs = Self::softmax(&candidates)?;
        self.sample_from_probs(&candidates, &probs)
    }

    /// Greedy decoding: the token with the highest finite logit.
    fn argmax(&self, logits: &[f32]) -> Result<u32> {
        logits
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i as u32)
            .ok_or_else(|| Error::Sampling("no eligible token".into()))
    }

    /// Keeps the k highest logits.
    fn apply_top_k(mut candidates: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(k);
        candidates
    }

    /// Softmax over the candidate logits.
    fn softmax(candidates: &[(usize, f32)]) -> Result<Vec<f64>> {
        let max = candidates
            .iter()
            .map(|(_, v)| *v)
            .filter(|v| !v.is_nan())
            .fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return Err(Error::Sampling("no eligible token".into()));
        }

        let exps: Vec<f64> = candidates
            .iter()
            .map(|(_, v)| if v.is_nan() { 0.0 } else { ((v - max) as f64).exp() })
            .collect();
        let sum: f64 = exps.iter().sum();
        Ok(exps.into_iter().map(|e| e / sum).collect())
    }

    /// Draws a candidate according to `probs`.
    fn sample_from_probs(&mut self, candidates: &[(usize, f32)], probs: &[f64]) -> Result<u32> {
        let dist = rand::distributions::WeightedIndex::new(probs)
            .map_err(|e| Error::Sampling(format!("failed to create distribution: {e}")))?;

        let sampled = dist.sample(&mut self.rng);
        candidates
            .get(sampled)
            .map(|(i, _)| *i as u32)
            .ok_or_else(|| Error::Sampling(format!("sampled index {sampled} out of range")))
    }
}
