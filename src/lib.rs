//! prompt-expansion: deterministic, vocabulary-biased prompt expansion.
//!
//! A short image-generation prompt is extended by a small GPT-2 model whose
//! sampling is restricted to a curated word list:
//! - Every non-listed token is masked with a negative-infinity bias
//! - Tokens already in the sequence are never repeated, except the separator
//! - The prompt grows to the next multiple of 75 tokens
//! - The same prompt and seed always give the same expansion

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod model;
pub mod text;
pub mod tokenizer;
pub mod vocab;

pub use config::{DeviceKind, ExpansionConfig, SamplingConfig};
pub use device::{DeviceManager, LocalDeviceManager, ModelHandle, PlacementPlan, Residency};
pub use engine::{
    length_budget, ConstrainedExpansionEngine, ConstrainedLogits, ExpansionRequest,
    ExpansionResult, LengthBudget, Sampler, SharedExpansionEngine,
};
pub use error::{Error, Result};
pub use model::{CausalLm, CheckpointSource, Gpt2Config, Gpt2ForCausalLM, ModelSource, ResourceBundle};
pub use text::{remove_empty_str, safe_str};
pub use tokenizer::PromptTokenizer;
pub use vocab::{LogitBias, VocabularyAllowList};
