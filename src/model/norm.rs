//! Layer Normalization implementation.
//!
//! GPT-2 normalizes every hidden vector to zero mean and unit variance and
//! then applies a learned scale and shift.
//!
//! Reference: <https://arxiv.org/abs/1607.06450>

use candle_core::{DType, Result, Tensor, D};
use candle_nn::VarBuilder;

/// Layer normalization with learnable weight and bias.
///
/// Formula: `output = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias`
///
/// Statistics are computed in f32 even when the model runs in half
/// precision.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Learnable scale parameter [hidden_size].
    weight: Tensor,
    /// Learnable shift parameter [hidden_size].
    bias: Tensor,
    /// Small constant for numerical stability.
    eps: f64,
}

impl LayerNorm {
    /// Creates a new LayerNorm layer.
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    /// Loads `weight` and `bias` from a VarBuilder.
    pub fn load(hidden_size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get(hidden_size, "weight")?;
        let bias = vb.get(hidden_size, "bias")?;
        Ok(Self::new(weight, bias, eps))
    }

    /// Creates an identity LayerNorm (weight = 1, bias = 0).
    ///
    /// Useful for testing or initialization before loading weights.
    pub fn new_identity(
        hidden_size: usize,
        eps: f64,
        dtype: DType,
        device: &candle_core::Device,
    ) -> Result<Self> {
        let weight = Tensor::ones(hidden_size, dtype, device)?;
        let bias = Tensor::zeros(hidden_size, dtype, device)?;
        Ok(Self { weight, bias, eps })
    }

    /// Returns a reference to the weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Returns the epsilon value.
    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Applies layer normalization over the last dimension.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let dtype = x.dtype();
        let x = x.to_dtype(DType::F32)?;

        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normalized = centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;

        normalized
            .to_dtype(dtype)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}
