//! GPT-2 model implementation.
//!
//! ## Architecture
//!
//! ```text
//! Input Token IDs        Positions
//!       │                    │
//!       ▼                    ▼
//! ┌───────────────┐  ┌───────────────┐
//! │     wte       │  │     wpe       │
//! └───────────────┘  └───────────────┘
//!       └────────── + ───────┘
//!                   │
//!                   ▼
//!          ┌───────────────┐
//!          │   Gpt2Block   │ × n_layer
//!          └───────────────┘
//!                   │
//!                   ▼
//!          ┌───────────────┐
//!          │     ln_f      │
//!          └───────────────┘
//!                   │
//!                   ▼
//!          ┌───────────────┐
//!          │    lm_head    │  tied to wte
//!          └───────────────┘
//!                   │
//!                   ▼
//!            Output Logits
//! ```

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{embedding, Embedding, Linear, VarBuilder};

use super::attention::KvCache;
use super::decoder::Gpt2Block;
use super::loader::Gpt2Config;
use super::norm::LayerNorm;
use super::CausalLm;

/// GPT-2 language model with a tied LM head.
#[derive(Debug, Clone)]
pub struct Gpt2ForCausalLM {
    /// Token embedding [vocab_size, n_embd].
    wte: Embedding,
    /// Learned position embedding [n_positions, n_embd].
    wpe: Embedding,
    /// Transformer blocks.
    blocks: Vec<Gpt2Block>,
    /// Final layer normalization.
    ln_f: LayerNorm,
    /// Projection to the vocabulary.
    lm_head: Linear,
    /// One KV cache per block.
    kv_caches: Vec<KvCache>,
    /// Model configuration.
    config: Gpt2Config,
    /// Device.
    device: Device,
    /// Data type.
    dtype: DType,
}

impl Gpt2ForCausalLM {
    /// Creates the model from a VarBuilder.
    ///
    /// Checkpoints saved from `GPT2LMHeadModel` keep their weights under a
    /// `transformer.` prefix; bare `GPT2Model` checkpoints do not. Both are
    /// accepted.
    pub fn new(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;

        let mut blocks = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            blocks.push(Gpt2Block::new(
                config.n_embd,
                config.intermediate_size(),
                config.n_head,
                config.layer_norm_epsilon,
                vb.pp(format!("h.{i}")),
            )?);
        }

        let ln_f = LayerNorm::load(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;
        let lm_head = Linear::new(wte.embeddings().clone(), None);

        Ok(Self {
            wte,
            wpe,
            kv_caches: vec![None; blocks.len()],
            blocks,
            ln_f,
            lm_head,
            config: config.clone(),
            device: vb.device().clone(),
            dtype: vb.dtype(),
        })
    }

    /// Creates a model with random weights for testing.
    pub fn new_random(config: &Gpt2Config, dtype: DType, device: &Device) -> Result<Self> {
        let wte_weight = Tensor::randn(0.0f32, 0.02, (config.vocab_size, config.n_embd), device)?
            .to_dtype(dtype)?;
        let wpe_weight = Tensor::randn(0.0f32, 0.01, (config.n_positions, config.n_embd), device)?
            .to_dtype(dtype)?;

        let blocks = (0..config.n_layer)
            .map(|_| {
                Gpt2Block::new_random(
                    config.n_embd,
                    config.intermediate_size(),
                    config.n_head,
                    config.layer_norm_epsilon,
                    dtype,
                    device,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            wte: Embedding::new(wte_weight.clone(), config.n_embd),
            wpe: Embedding::new(wpe_weight, config.n_embd),
            kv_caches: vec![None; blocks.len()],
            blocks,
            ln_f: LayerNorm::new_identity(config.n_embd, config.layer_norm_epsilon, dtype, device)?,
            lm_head: Linear::new(wte_weight, None),
            config: config.clone(),
            device: device.clone(),
            dtype,
        })
    }

    /// Returns the number of blocks.
    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the model configuration.
    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    /// Forward pass returning logits for every position [batch, seq_len, vocab_size].
    pub fn forward_all(&mut self, input_ids: &Tensor, start_pos: usize) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(start_pos as u32, (start_pos + seq_len) as u32, &self.device)?
            .unsqueeze(0)?;

        let mut hidden_states = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        for (block, cache) in self.blocks.iter().zip(self.kv_caches.iter_mut()) {
            hidden_states = block.forward(&hidden_states, start_pos, cache)?;
        }

        let hidden_states = self.ln_f.forward(&hidden_states)?;
        self.lm_head.forward(&hidden_states)
    }
}

impl CausalLm for Gpt2ForCausalLM {
    fn forward(&mut self, input_ids: &[u32], start_pos: usize) -> Result<Tensor> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        let logits = self.forward_all(&input, start_pos)?;

        // Last position of the only sequence: [vocab_size]
        let seq_len = logits.dim(1)?;
        logits.narrow(1, seq_len - 1, 1)?.squeeze(1)?.squeeze(0)
    }

    fn clear_kv_cache(&mut self) {
        self.kv_caches.iter_mut().for_each(|cache| *cache = None);
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn max_positions(&self) -> usize {
        self.config.n_positions
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}
