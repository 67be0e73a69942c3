//! Constrained prompt expansion engine.
//!
//! The engine extends a prompt with tokens drawn only from a curated
//! vocabulary until its token count reaches the next multiple of the block
//! size. Given the same prompt, seed and resources the output is identical.
//!
//! ## Expansion Flow
//!
//! ```text
//!  prompt, seed
//!       │
//!       ▼ empty? ──────────────────────────▶ ("", seed)
//!       │
//!       ▼ seed % seed_modulus
//!       ▼ sanitize + append separator
//!       ▼ tokenize
//!       │
//!       ▼ length budget ── max_new == 0 ───▶ (prompt without separator, seed)
//!       │
//!       ▼ ensure model resident
//!  ┌─────────────────────────────────┐
//!  │ forward ─▶ bias ─▶ no-repeat ─▶ │  × max_new
//!  │ separator reset ─▶ sample       │
//!  └─────────────────────────────────┘
//!       │
//!       ▼ decode (skip special tokens)
//!       ▼ sanitize
//!  (expanded prompt, seed)
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use candle_core::DType;
use tracing::{debug, info};

use super::processor::ConstrainedLogits;
use super::request::{ExpansionRequest, ExpansionResult};
use super::sampler::Sampler;
use crate::config::ExpansionConfig;
use crate::device::{DeviceManager, ModelHandle, PlacementPlan, Placement};
use crate::error::{Error, Result};
use crate::model::{CausalLm, CheckpointSource, ModelSource, ResourceBundle};
use crate::text::sanitize;
use crate::tokenizer::PromptTokenizer;
use crate::vocab::{LogitBias, VocabularyAllowList};

/// Token counts for one expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBudget {
    /// Tokens in the prepared prompt.
    pub prompt_tokens: usize,
    /// Smallest multiple of the block size that is at least `prompt_tokens`.
    pub target_tokens: usize,
    /// Tokens to generate.
    pub max_new_tokens: usize,
}

/// Computes the generation budget for a prompt of `prompt_tokens` tokens.
pub fn length_budget(prompt_tokens: usize, block_size: usize) -> LengthBudget {
    let target_tokens = prompt_tokens.div_ceil(block_size) * block_size;
    LengthBudget {
        prompt_tokens,
        target_tokens,
        max_new_tokens: target_tokens - prompt_tokens,
    }
}

/// Immutable decoding state derived once at construction.
#[derive(Debug, Clone)]
pub struct ExpansionSettings {
    config: ExpansionConfig,
    bias: LogitBias,
    separator_id: u32,
    eos_id: Option<u32>,
}

impl ExpansionSettings {
    /// Configuration the engine was built with.
    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    /// Vocabulary bias.
    pub fn bias(&self) -> &LogitBias {
        &self.bias
    }

    /// Separator token id.
    pub fn separator_id(&self) -> u32 {
        self.separator_id
    }

    /// End-of-sequence token id, if the tokenizer has one.
    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }
}

/// Vocabulary-constrained prompt expansion engine.
///
/// `expand` takes `&mut self`: one generation runs at a time per engine.
/// Wrap it in [`SharedExpansionEngine`] to share it between threads.
pub struct ConstrainedExpansionEngine<S: ModelSource, T: PromptTokenizer = tokenizers::Tokenizer> {
    tokenizer: T,
    handle: ModelHandle<S>,
    devices: Arc<dyn DeviceManager>,
    settings: ExpansionSettings,
}

impl ConstrainedExpansionEngine<CheckpointSource, tokenizers::Tokenizer> {
    /// Loads an engine from a resource bundle directory.
    ///
    /// The directory must contain `config.json`, `tokenizer.json`, a
    /// checkpoint and the allow-list word file. Any missing or malformed
    /// file fails here.
    pub fn load(
        dir: impl AsRef<Path>,
        config: ExpansionConfig,
        devices: Arc<dyn DeviceManager>,
    ) -> Result<Self> {
        config.validate()?;
        let bundle = ResourceBundle::open(dir, &config.allow_list_file)?;
        let tokenizer = bundle.load_tokenizer()?;
        let source = bundle.checkpoint()?;
        let allow_list = VocabularyAllowList::from_file(&bundle.allow_list, &config.word_marker)?;
        Self::new(tokenizer, source, &allow_list, config, devices)
    }
}

impl<S: ModelSource, T: PromptTokenizer> ConstrainedExpansionEngine<S, T> {
    /// Builds an engine from its parts.
    ///
    /// The bias is computed here and the model is loaded onto the offload
    /// device; the first `expand` moves it to the inference device.
    pub fn new(
        tokenizer: T,
        source: S,
        allow_list: &VocabularyAllowList,
        config: ExpansionConfig,
        devices: Arc<dyn DeviceManager>,
    ) -> Result<Self> {
        config.validate()?;

        let separator_id = tokenizer.token_to_id(&config.separator).ok_or_else(|| {
            Error::ResourceLoad(format!(
                "separator {:?} is not a single token",
                config.separator
            ))
        })?;
        let eos_id = config
            .eos_token
            .as_deref()
            .and_then(|token| tokenizer.token_to_id(token));

        let vocab_size = source.vocab_size();
        if separator_id as usize >= vocab_size {
            return Err(Error::ResourceLoad(format!(
                "separator id {separator_id} outside model vocabulary of {vocab_size}"
            )));
        }
        let bias = LogitBias::build(&tokenizer.vocab(), allow_list, vocab_size);

        let plan = PlacementPlan::resolve(devices.as_ref());
        let mut handle = ModelHandle::new(source, plan.load_device, plan.offload_device, plan.dtype);
        handle.preload()?;

        Ok(Self {
            tokenizer,
            handle,
            devices,
            settings: ExpansionSettings {
                config,
                bias,
                separator_id,
                eos_id,
            },
        })
    }

    /// Expands `prompt` using `seed`.
    ///
    /// Returns the expanded prompt and the seed actually used for sampling.
    pub fn expand(&mut self, prompt: &str, seed: u64) -> Result<ExpansionResult> {
        if prompt.is_empty() {
            return Ok(ExpansionResult {
                text: String::new(),
                seed,
            });
        }

        let config = &self.settings.config;
        let seed = seed % config.seed_modulus;
        let mut prepared = sanitize(prompt, config.sanitize_passes);
        prepared.push_str(&config.separator);

        let input_ids = self.tokenizer.encode(&prepared)?;
        let budget = length_budget(input_ids.len(), config.block_size);
        debug!(
            seed,
            prompt_tokens = budget.prompt_tokens,
            target_tokens = budget.target_tokens,
            max_new_tokens = budget.max_new_tokens,
            "expanding prompt"
        );

        if budget.max_new_tokens == 0 {
            prepared.truncate(prepared.len() - config.separator.len());
            return Ok(ExpansionResult {
                text: prepared,
                seed,
            });
        }

        self.devices.ensure_resident(&mut self.handle)?;
        let model = self.handle.model_mut()?;
        if budget.target_tokens > model.max_positions() {
            return Err(Error::ContextOverflow {
                requested: budget.target_tokens,
                max_positions: model.max_positions(),
            });
        }

        let mut sampler = Sampler::with_seed(&self.settings.config.sampling, seed);
        let ids = generate(model, &self.settings, &mut sampler, input_ids, budget.max_new_tokens)?;

        let decoded = self.tokenizer.decode(&ids)?;
        Ok(ExpansionResult {
            text: sanitize(&decoded, self.settings.config.sanitize_passes),
            seed,
        })
    }

    /// Expands a request.
    pub fn expand_request(&mut self, request: &ExpansionRequest) -> Result<ExpansionResult> {
        self.expand(&request.prompt, request.seed)
    }

    /// Moves the model to the offload device.
    pub fn offload(&mut self) -> Result<()> {
        self.handle.offload()
    }

    /// Decoding settings.
    pub fn settings(&self) -> &ExpansionSettings {
        &self.settings
    }

    /// Model handle.
    pub fn handle(&self) -> &ModelHandle<S> {
        &self.handle
    }
}

/// Runs the constrained sampling loop and returns prompt plus new tokens.
fn generate<M: CausalLm>(
    model: &mut M,
    settings: &ExpansionSettings,
    sampler: &mut Sampler,
    mut ids: Vec<u32>,
    max_new_tokens: usize,
) -> Result<Vec<u32>> {
    let processor = ConstrainedLogits::new(&settings.bias, settings.separator_id);
    model.clear_kv_cache();

    let mut fed = 0;
    for _ in 0..max_new_tokens {
        let logits = model.forward(&ids[fed..], fed)?;
        fed = ids.len();
        let mut logits: Vec<f32> = logits.to_dtype(DType::F32)?.to_vec1()?;

        processor.apply(&mut logits, &ids)?;
        let next = sampler.sample(&logits)?;
        ids.push(next);

        if settings.eos_id == Some(next) {
            debug!(total_tokens = ids.len(), "end of sequence sampled");
            break;
        }
    }
    Ok(ids)
}

/// Thread-safe handle to an engine.
///
/// Calls are serialized through a mutex.
pub struct SharedExpansionEngine<S: ModelSource, T: PromptTokenizer = tokenizers::Tokenizer> {
    inner: Arc<Mutex<ConstrainedExpansionEngine<S, T>>>,
}

impl<S: ModelSource, T: PromptTokenizer> Clone for SharedExpansionEngine<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ModelSource, T: PromptTokenizer> SharedExpansionEngine<S, T> {
    /// Wraps an engine.
    pub fn new(engine: ConstrainedExpansionEngine<S, T>) -> Self {
        info!("prompt expansion engine shared");
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Expands `prompt`, waiting for any in-flight call to finish.
    pub fn expand(&self, prompt: &str, seed: u64) -> Result<ExpansionResult> {
        let mut engine = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        engine.expand(prompt, seed)
    }

    /// Moves the model to the offload device.
    pub fn offload(&self) -> Result<()> {
        let mut engine = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        engine.offload()
    }
}
