//! Expansion engine.
//!
//! This module contains:
//! - ConstrainedExpansionEngine for biased, non-repeating prompt expansion
//! - ConstrainedLogits for the per-step logits rewrite
//! - Sampler for seeded top-k sampling
//! - Request and result types

pub mod expansion;
pub mod processor;
pub mod request;
pub mod sampler;

pub use expansion::{
    length_budget, ConstrainedExpansionEngine, ExpansionSettings, LengthBudget,
    SharedExpansionEngine,
};
pub use processor::ConstrainedLogits;
pub use request::{ExpansionRequest, ExpansionResult, HOST_SEED_LIMIT};
pub use sampler::Sampler;
