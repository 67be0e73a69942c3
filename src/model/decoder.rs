//! GPT-2 transformer block.
//!
//! A block combines self-attention and MLP with residual connections in the
//! pre-norm arrangement.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;

use super::attention::{Gpt2Attention, KvCache};
use super::mlp::Gpt2Mlp;
use super::norm::LayerNorm;

/// GPT-2 transformer block.
///
/// 1. `ln_1` -> self-attention -> residual add
/// 2. `ln_2` -> MLP -> residual add
#[derive(Debug, Clone)]
pub struct Gpt2Block {
    /// Normalization before attention.
    ln_1: LayerNorm,
    /// Self-attention module.
    attn: Gpt2Attention,
    /// Normalization before the MLP.
    ln_2: LayerNorm,
    /// Feed-forward MLP.
    mlp: Gpt2Mlp,
}

impl Gpt2Block {
    /// Creates a new block from a VarBuilder rooted at `h.{i}`.
    pub fn new(
        hidden_size: usize,
        intermediate_size: usize,
        num_heads: usize,
        layer_norm_eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            ln_1: LayerNorm::load(hidden_size, layer_norm_eps, vb.pp("ln_1"))?,
            attn: Gpt2Attention::new(hidden_size, num_heads, vb.pp("attn"))?,
            ln_2: LayerNorm::load(hidden_size, layer_norm_eps, vb.pp("ln_2"))?,
            mlp: Gpt2Mlp::new(hidden_size, intermediate_size, vb.pp("mlp"))?,
        })
    }

    /// Creates a block with random weights for testing.
    pub fn new_random(
        hidden_size: usize,
        intermediate_size: usize,
        num_heads: usize,
        layer_norm_eps: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            ln_1: LayerNorm::new_identity(hidden_size, layer_norm_eps, dtype, device)?,
            attn: Gpt2Attention::new_random(hidden_size, num_heads, dtype, device)?,
            ln_2: LayerNorm::new_identity(hidden_size, layer_norm_eps, dtype, device)?,
            mlp: Gpt2Mlp::new_random(hidden_size, intermediate_size, dtype, device)?,
        })
    }

    /// Forward pass: `[batch, seq_len, hidden] -> [batch, seq_len, hidden]`.
    pub fn forward(&self, x: &Tensor, start_pos: usize, kv_cache: &mut KvCache) -> Result<Tensor> {
        let residual = x;
        let h = self.ln_1.forward(x)?;
        let h = self.attn.forward(&h, start_pos, kv_cache)?;
        let x = (residual + h)?;

        let residual = &x;
        let h = self.ln_2.forward(&x)?;
        let h = self.mlp.forward(&h)?;
        residual + h
    }
}
