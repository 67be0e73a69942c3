//! Model loading utilities.
//!
//! This module provides:
//! - Locating the files of a local resource bundle
//! - Parsing GPT-2 `config.json`
//! - Creating a VarBuilder from SafeTensors or PyTorch weights
//!
//! The bundle directory must already be populated; fetching the checkpoint
//! is left to the host.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::Deserialize;
use tracing::debug;

use super::gpt2::Gpt2ForCausalLM;
use super::ModelSource;
use crate::error::{Error, Result};

/// Weight file names tried in order.
const WEIGHT_CANDIDATES: [(&str, WeightsFormat); 2] = [
    ("model.safetensors", WeightsFormat::SafeTensors),
    ("pytorch_model.bin", WeightsFormat::PyTorch),
];

/// On-disk format of the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsFormat {
    /// `model.safetensors`, memory-mapped.
    SafeTensors,
    /// `pytorch_model.bin`, a pickled state dict.
    PyTorch,
}

/// Paths of a local expansion resource bundle.
#[derive(Debug, Clone)]
pub struct ResourceBundle {
    /// Bundle directory.
    pub dir: PathBuf,
    /// Path to config.json.
    pub config: PathBuf,
    /// Path to the checkpoint.
    pub weights: PathBuf,
    /// Checkpoint format.
    pub format: WeightsFormat,
    /// Path to tokenizer.json.
    pub tokenizer: PathBuf,
    /// Path to the allow-list word file.
    pub allow_list: PathBuf,
}

impl ResourceBundle {
    /// Locates every file of the bundle in `dir`.
    ///
    /// Fails with [`Error::ResourceLoad`] naming the first missing file.
    pub fn open(dir: impl AsRef<Path>, allow_list_file: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(Error::ResourceLoad(format!(
                "resource directory {} does not exist",
                dir.display()
            )));
        }

        let require = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(Error::ResourceLoad(format!("missing {}", path.display())))
            }
        };

        let (weights, format) = WEIGHT_CANDIDATES
            .iter()
            .map(|(name, format)| (dir.join(name), *format))
            .find(|(path, _)| path.is_file())
            .ok_or_else(|| {
                Error::ResourceLoad(format!(
                    "no model.safetensors or pytorch_model.bin in {}",
                    dir.display()
                ))
            })?;

        let bundle = Self {
            config: require("config.json")?,
            tokenizer: require("tokenizer.json")?,
            allow_list: require(allow_list_file)?,
            weights,
            format,
            dir,
        };
        debug!(dir = %bundle.dir.display(), format = ?bundle.format, "resource bundle located");
        Ok(bundle)
    }

    /// Loads the tokenizer definition.
    pub fn load_tokenizer(&self) -> Result<tokenizers::Tokenizer> {
        tokenizers::Tokenizer::from_file(&self.tokenizer).map_err(|e| {
            Error::ResourceLoad(format!(
                "failed to load tokenizer {}: {e}",
                self.tokenizer.display()
            ))
        })
    }

    /// Parses config.json and pairs it with the checkpoint.
    pub fn checkpoint(&self) -> Result<CheckpointSource> {
        Ok(CheckpointSource {
            config: load_config(&self.config)?,
            weights: self.weights.clone(),
            format: self.format,
        })
    }
}

/// Creates a VarBuilder over a checkpoint.
///
/// # Safety
///
/// SafeTensors files are memory-mapped. This is safe as long as the file is
/// not modified while the model is alive.
#[allow(unsafe_code)]
pub fn load_weights(
    path: &Path,
    format: WeightsFormat,
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let vb = match format {
        WeightsFormat::SafeTensors => unsafe {
            VarBuilder::from_mmaped_safetensors(&[path], dtype, device)?
        },
        WeightsFormat::PyTorch => VarBuilder::from_pth(path, dtype, device)?,
    };
    Ok(vb)
}

/// Loads GPT-2 configuration from config.json.
pub fn load_config(path: &Path) -> Result<Gpt2Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::ResourceLoad(format!("failed to read {}: {e}", path.display()))
    })?;

    let config: Gpt2Config = serde_json::from_str(&content).map_err(|e| {
        Error::ResourceLoad(format!("failed to parse {}: {e}", path.display()))
    })?;

    Ok(config)
}

/// GPT-2 model configuration from HuggingFace config.json.
#[derive(Debug, Clone, Deserialize)]
pub struct Gpt2Config {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Maximum sequence length.
    #[serde(default = "default_n_positions")]
    pub n_positions: usize,
    /// Hidden dimension.
    pub n_embd: usize,
    /// Number of transformer blocks.
    pub n_layer: usize,
    /// Number of attention heads.
    pub n_head: usize,
    /// MLP inner dimension; `4 * n_embd` when absent.
    #[serde(default)]
    pub n_inner: Option<usize>,
    /// LayerNorm epsilon.
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    /// End-of-sequence token id.
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

fn default_n_positions() -> usize {
    1024
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

impl Gpt2Config {
    /// MLP inner dimension.
    pub fn intermediate_size(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }

    /// Validates head/hidden divisibility.
    pub fn validate(&self) -> Result<()> {
        if self.n_head == 0 || self.n_embd % self.n_head != 0 {
            return Err(Error::Config(format!(
                "n_embd {} is not divisible by n_head {}",
                self.n_embd, self.n_head
            )));
        }
        Ok(())
    }
}

/// A GPT-2 checkpoint on disk.
#[derive(Debug, Clone)]
pub struct CheckpointSource {
    /// Parsed model configuration.
    pub config: Gpt2Config,
    /// Weight file.
    pub weights: PathBuf,
    /// Weight file format.
    pub format: WeightsFormat,
}

impl ModelSource for CheckpointSource {
    type Model = Gpt2ForCausalLM;

    fn load(&self, device: &Device, dtype: DType) -> Result<Gpt2ForCausalLM> {
        self.config.validate()?;
        let vb = load_weights(&self.weights, self.format, dtype, device)?;
        let model = Gpt2ForCausalLM::new(&self.config, vb).map_err(|e| {
            Error::ResourceLoad(format!(
                "failed to build model from {}: {e}",
                self.weights.display()
            ))
        })?;
        Ok(model)
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }
}
