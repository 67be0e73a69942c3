//! Continuation vocabulary.
//!
//! This module contains:
//! - VocabularyAllowList, the fixed set of continuation words
//! - LogitBias, the additive mask built from it

pub mod allow_list;
pub mod bias;

pub use allow_list::VocabularyAllowList;
pub use bias::LogitBias;
