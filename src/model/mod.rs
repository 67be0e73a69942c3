//! Model implementations.
//!
//! This module contains:
//! - The `CausalLm` and `ModelSource` seams used by the expansion engine
//! - GPT-2 in candle (embeddings, blocks, LayerNorm, tied LM head)
//! - Resource-bundle loading (config, checkpoint, tokenizer, word list)

pub mod attention;
pub mod decoder;
pub mod gpt2;
pub mod loader;
pub mod mlp;
pub mod norm;

use candle_core::{DType, Device, Tensor};

pub use attention::Gpt2Attention;
pub use decoder::Gpt2Block;
pub use gpt2::Gpt2ForCausalLM;
pub use loader::{load_config, CheckpointSource, Gpt2Config, ResourceBundle, WeightsFormat};
pub use mlp::Gpt2Mlp;
pub use norm::LayerNorm;

/// A causal language model driven one step at a time.
pub trait CausalLm {
    /// Runs `input_ids` starting at position `start_pos` and returns the
    /// logits of the last position, shape `[vocab_size]`.
    ///
    /// Implementations keep a KV cache, so after the prompt has been fed at
    /// position 0 only newly sampled tokens need to be passed.
    fn forward(&mut self, input_ids: &[u32], start_pos: usize) -> candle_core::Result<Tensor>;

    /// Drops cached keys and values before a new sequence.
    fn clear_kv_cache(&mut self);

    /// Number of logits produced per step.
    fn vocab_size(&self) -> usize;

    /// Longest sequence the model can attend over.
    fn max_positions(&self) -> usize;

    /// Device holding the weights.
    fn device(&self) -> &Device;

    /// Data type of the weights.
    fn dtype(&self) -> DType;
}

/// Something that can materialize a model on a device.
///
/// Moving a candle model between devices means loading its weights again,
/// so device placement goes through this trait.
pub trait ModelSource {
    /// The model type produced.
    type Model: CausalLm;

    /// Loads the model on `device` with weights in `dtype`.
    fn load(&self, device: &Device, dtype: DType) -> crate::Result<Self::Model>;

    /// Vocabulary size the model will produce logits for.
    fn vocab_size(&self) -> usize;
}
