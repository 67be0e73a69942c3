//! Configuration types for prompt-expansion.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Modulus applied to caller seeds before seeding the sampler.
pub const SEED_MODULUS: u64 = 1 << 32;

/// Expansion configuration.
///
/// The defaults are the fixed decoding policy the expansion checkpoint was
/// tuned for; a JSON file may override individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Prompts are grown to the next multiple of this many tokens.
    pub block_size: usize,
    /// Seeds are reduced modulo this value.
    pub seed_modulus: u64,
    /// Token that stays eligible regardless of bias and repetition.
    pub separator: String,
    /// Word-boundary marker prefixed to allow-list words before matching.
    pub word_marker: String,
    /// Number of double-space collapse passes in sanitation.
    pub sanitize_passes: usize,
    /// Word list file name inside the resource bundle.
    pub allow_list_file: String,
    /// End-of-sequence token, if the tokenizer defines one.
    pub eos_token: Option<String>,
    /// Sampling parameters.
    pub sampling: SamplingConfig,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            block_size: 75,
            seed_modulus: SEED_MODULUS,
            separator: ",".to_string(),
            word_marker: "\u{0120}".to_string(),
            sanitize_passes: 16,
            allow_list_file: "positive.txt".to_string(),
            eos_token: Some("<|endoftext|>".to_string()),
            sampling: SamplingConfig::default(),
        }
    }
}

impl ExpansionConfig {
    /// Loads a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the decoding loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be positive".into()));
        }
        if self.seed_modulus == 0 {
            return Err(Error::Config("seed_modulus must be positive".into()));
        }
        if self.separator.is_empty() {
            return Err(Error::Config("separator must not be empty".into()));
        }
        if self.sampling.temperature < 0.0 {
            return Err(Error::Config("temperature must not be negative".into()));
        }
        Ok(())
    }
}

/// Sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Temperature for sampling (1.0 = no change, 0.0 = greedy).
    pub temperature: f32,
    /// Top-k sampling (0 = disabled).
    pub top_k: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 100,
        }
    }
}

/// Requested compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// CUDA if available, then Metal, then CPU.
    #[default]
    Auto,
    /// Host CPU.
    Cpu,
    /// First CUDA device.
    Cuda,
    /// First Metal device.
    Metal,
}
