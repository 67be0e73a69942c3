//! GPT-2 MLP (Multi-Layer Perceptron) implementation.
//!
//! A two-layer feed-forward network with a tanh-approximated GELU between
//! the projections.

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

/// Loads a GPT-2 `Conv1D` projection as a [`Linear`] layer.
///
/// GPT-2 checkpoints store these weights as `[in_dim, out_dim]`, the
/// transpose of what `Linear` expects.
pub(crate) fn conv1d(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get((in_dim, out_dim), "weight")?.t()?.contiguous()?;
    let bias = vb.get(out_dim, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Random projection for tests, in `Linear` layout `[out_dim, in_dim]`.
pub(crate) fn random_linear(
    in_dim: usize,
    out_dim: usize,
    dtype: DType,
    device: &Device,
) -> Result<Linear> {
    let weight = Tensor::randn(0.0f32, 0.02, (out_dim, in_dim), device)?.to_dtype(dtype)?;
    let bias = Tensor::zeros(out_dim, dtype, device)?;
    Ok(Linear::new(weight, Some(bias)))
}

/// GPT-2 MLP.
///
/// Formula: `output = c_proj(gelu(c_fc(x)))`
#[derive(Debug, Clone)]
pub struct Gpt2Mlp {
    /// Expansion projection.
    c_fc: Linear,
    /// Contraction projection.
    c_proj: Linear,
    /// Hidden dimension.
    hidden_size: usize,
    /// Intermediate dimension.
    intermediate_size: usize,
}

impl Gpt2Mlp {
    /// Creates a new Gpt2Mlp from a VarBuilder.
    pub fn new(hidden_size: usize, intermediate_size: usize, vb: VarBuilder) -> Result<Self> {
        let c_fc = conv1d(hidden_size, intermediate_size, vb.pp("c_fc"))?;
        let c_proj = conv1d(intermediate_size, hidden_size, vb.pp("c_proj"))?;

        Ok(Self {
            c_fc,
            c_proj,
            hidden_size,
            intermediate_size,
        })
    }

    /// Creates a new Gpt2Mlp with random weights for testing.
    pub fn new_random(
        hidden_size: usize,
        intermediate_size: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            c_fc: random_linear(hidden_size, intermediate_size, dtype, device)?,
            c_proj: random_linear(intermediate_size, hidden_size, dtype, device)?,
            hidden_size,
            intermediate_size,
        })
    }

    /// Returns the hidden size.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Returns the intermediate size.
    pub fn intermediate_size(&self) -> usize {
        self.intermediate_size
    }

    /// Forward pass: `[..., hidden_size] -> [..., hidden_size]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.c_fc.forward(x)?.gelu()?;
        self.c_proj.forward(&hidden)
    }
}
