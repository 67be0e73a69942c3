//! GPT-2 Attention implementation.
//!
//! Multi-head causal self-attention with:
//! - A fused `c_attn` projection producing Q, K and V
//! - KV cache support for incremental decoding
//!
//! Positions are handled by the learned position embedding in the model,
//! so no rotary encoding is applied here.

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{Linear, VarBuilder};

use super::mlp::{conv1d, random_linear};

/// Cached keys and values, each `[batch, num_heads, kv_seq_len, head_dim]`.
pub type KvCache = Option<(Tensor, Tensor)>;

/// GPT-2 multi-head self-attention.
#[derive(Debug, Clone)]
pub struct Gpt2Attention {
    /// Fused QKV projection [hidden_size] -> [3 * hidden_size].
    c_attn: Linear,
    /// Output projection [hidden_size] -> [hidden_size].
    c_proj: Linear,
    /// Number of heads.
    num_heads: usize,
    /// Dimension per head.
    head_dim: usize,
    /// Hidden dimension.
    hidden_size: usize,
    /// Scaling factor for attention scores.
    scale: f64,
}

impl Gpt2Attention {
    /// Creates a new Gpt2Attention from a VarBuilder.
    pub fn new(hidden_size: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let c_attn = conv1d(hidden_size, 3 * hidden_size, vb.pp("c_attn"))?;
        let c_proj = conv1d(hidden_size, hidden_size, vb.pp("c_proj"))?;
        Ok(Self::from_parts(c_attn, c_proj, hidden_size, num_heads))
    }

    /// Creates a new Gpt2Attention with random weights for testing.
    pub fn new_random(
        hidden_size: usize,
        num_heads: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let c_attn = random_linear(hidden_size, 3 * hidden_size, dtype, device)?;
        let c_proj = random_linear(hidden_size, hidden_size, dtype, device)?;
        Ok(Self::from_parts(c_attn, c_proj, hidden_size, num_heads))
    }

    fn from_parts(c_attn: Linear, c_proj: Linear, hidden_size: usize, num_heads: usize) -> Self {
        let head_dim = hidden_size / num_heads;
        Self {
            c_attn,
            c_proj,
            num_heads,
            head_dim,
            hidden_size,
            scale: 1.0 / (head_dim as f64).sqrt(),
        }
    }

    /// Returns the number of heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Returns the head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Forward pass through the attention layer.
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - Input tensor [batch, seq_len, hidden_size]
    /// * `start_pos` - Position of the first input token (0 for prefill)
    /// * `kv_cache` - Keys and values of earlier positions; updated in place
    ///
    /// # Returns
    ///
    /// Output tensor [batch, seq_len, hidden_size]
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        start_pos: usize,
        kv_cache: &mut KvCache,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, _) = hidden_states.dims3()?;

        // [batch, seq_len, 3 * hidden] -> three [batch, num_heads, seq_len, head_dim]
        let qkv = self.c_attn.forward(hidden_states)?;
        let split = |i: usize| -> Result<Tensor> {
            qkv.narrow(D::Minus1, i * self.hidden_size, self.hidden_size)?
                .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(0)?;
        let k = split(1)?;
        let v = split(2)?;

        let (k, v) = match kv_cache.take() {
            Some((k_cache, v_cache)) => (
                Tensor::cat(&[&k_cache, &k], 2)?,
                Tensor::cat(&[&v_cache, &v], 2)?,
            ),
            None => (k, v),
        };
        *kv_cache = Some((k.clone(), v.clone()));

        let kv_seq_len = k.dim(2)?;

        // [batch, num_heads, seq_len, kv_seq_len]
        let attn_weights = (q.matmul(&k.t()?)? * self.scale)?;
        let attn_weights = if seq_len > 1 {
            let mask = self.create_causal_mask(seq_len, kv_seq_len, start_pos, q.device())?;
            attn_weights.broadcast_add(&mask.to_dtype(attn_weights.dtype())?)?
        } else {
            attn_weights
        };

        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;
        let attn_output = attn_weights.matmul(&v)?;

        let attn_output = attn_output
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch_size, seq_len, self.hidden_size))?;

        self.c_proj.forward(&attn_output)
    }

    /// Creates a causal attention mask [1, 1, seq_len, kv_seq_len].
    fn create_causal_mask(
        &self,
        seq_len: usize,
        kv_seq_len: usize,
        start_pos: usize,
        device: &Device,
    ) -> Result<Tensor> {
        let mask: Vec<f32> = (0..seq_len)
            .flat_map(|i| {
                let query_pos = start_pos + i;
                (0..kv_seq_len).map(move |key_pos| {
                    if key_pos > query_pos {
                        f32::NEG_INFINITY
                    } else {
                        0.0
                    }
                })
            })
            .collect();
        Tensor::from_vec(mask, (1, 1, seq_len, kv_seq_len), device)
    }
}
