//! Integration tests for ConstrainedExpansionEngine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use prompt_expansion::device::{DeviceManager, Placement, Residency};
use prompt_expansion::model::{CausalLm, Gpt2Config, Gpt2ForCausalLM, ModelSource};
use prompt_expansion::{
    ConstrainedExpansionEngine, Error, ExpansionConfig, PromptTokenizer, Result,
    SharedExpansionEngine, VocabularyAllowList,
};

const MARKER: char = '\u{0120}';

const VOCAB: [&str; 16] = [
    "<|endoftext|>",
    ",",
    "a",
    "Ġcat",
    "Ġsitting",
    "Ġon",
    "Ġa",
    "Ġmat",
    "Ġred",
    "Ġbright",
    "Ġdetailed",
    "Ġcinematic",
    "Ġlight",
    "ing",
    "Ġthe",
    "Ġsharp",
];

const ALLOWED: [&str; 7] = ["red", "bright", "detailed", "cinematic", "light", "sharp", "cat"];

const SEPARATOR: u32 = 1;

/// Word-level tokenizer over `VOCAB`.
struct WordTokenizer {
    vocab: HashMap<String, u32>,
}

impl WordTokenizer {
    fn new() -> Self {
        let vocab = VOCAB
            .iter()
            .enumerate()
            .map(|(id, surface)| (surface.to_string(), id as u32))
            .collect();
        Self { vocab }
    }

    fn lookup(&self, surface: &str) -> Result<u32> {
        self.vocab
            .get(surface)
            .copied()
            .ok_or_else(|| Error::Tokenization(format!("unknown token {surface:?}")))
    }
}

impl PromptTokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        let mut word = String::new();
        let mut spaced = false;
        for c in text.chars().chain(std::iter::once('\0')) {
            if c == ' ' || c == ',' || c == '\0' {
                if !word.is_empty() {
                    let surface = if spaced { format!("{MARKER}{word}") } else { word.clone() };
                    ids.push(self.lookup(&surface)?);
                    word.clear();
                }
                if c == ',' {
                    ids.push(SEPARATOR);
                }
                spaced = c == ' ';
            } else {
                word.push(c);
            }
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(ids
            .iter()
            .filter(|&&id| id != 0)
            .map(|&id| VOCAB[id as usize].replace(MARKER, " "))
            .collect())
    }

    fn vocab(&self) -> HashMap<String, u32> {
        self.vocab.clone()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.get(token).copied()
    }
}

/// How the scripted model scores the next token.
#[derive(Debug, Clone, Copy)]
enum Script {
    /// Word after separator, separator after word; lower ids preferred.
    Alternating,
    /// Every token equally likely.
    Flat,
}

struct ScriptedModel {
    script: Script,
    history: Vec<u32>,
    forwards: Arc<AtomicUsize>,
    max_positions: usize,
    device: Device,
}

impl CausalLm for ScriptedModel {
    fn forward(&mut self, input_ids: &[u32], start_pos: usize) -> candle_core::Result<Tensor> {
        assert_eq!(start_pos, self.history.len(), "cache position out of sync");
        self.history.extend_from_slice(input_ids);
        self.forwards.fetch_add(1, Ordering::SeqCst);

        let after_separator = self.history.last() == Some(&SEPARATOR);
        let logits: Vec<f32> = (0..VOCAB.len() as u32)
            .map(|id| match self.script {
                Script::Flat => 0.0,
                Script::Alternating if id == SEPARATOR => {
                    if after_separator {
                        -1000.0
                    } else {
                        0.0
                    }
                }
                Script::Alternating => -(id as f32) * 50.0,
            })
            .collect();
        Tensor::new(logits.as_slice(), &self.device)
    }

    fn clear_kv_cache(&mut self) {
        self.history.clear();
    }

    fn vocab_size(&self) -> usize {
        VOCAB.len()
    }

    fn max_positions(&self) -> usize {
        self.max_positions
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn dtype(&self) -> DType {
        DType::F32
    }
}

#[derive(Clone)]
struct ScriptedSource {
    script: Script,
    max_positions: usize,
    fail_load: bool,
    loads: Arc<AtomicUsize>,
    forwards: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(script: Script) -> Self {
        Self {
            script,
            max_positions: 1024,
            fail_load: false,
            loads: Arc::new(AtomicUsize::new(0)),
            forwards: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ModelSource for ScriptedSource {
    type Model = ScriptedModel;

    fn load(&self, device: &Device, _dtype: DType) -> Result<ScriptedModel> {
        if self.fail_load {
            return Err(Error::ResourceLoad("corrupt checkpoint".into()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedModel {
            script: self.script,
            history: Vec::new(),
            forwards: Arc::clone(&self.forwards),
            max_positions: self.max_positions,
            device: device.clone(),
        })
    }

    fn vocab_size(&self) -> usize {
        VOCAB.len()
    }
}

/// CPU-only device manager that counts residency requests.
#[derive(Default)]
struct CountingDevices {
    ensures: AtomicUsize,
    fail: bool,
}

impl DeviceManager for CountingDevices {
    fn inference_device(&self) -> Device {
        Device::Cpu
    }

    fn offload_device(&self) -> Device {
        Device::Cpu
    }

    fn is_special_device(&self, _device: &Device) -> bool {
        false
    }

    fn prefers_reduced_precision(&self, _device: &Device) -> bool {
        false
    }

    fn ensure_resident(&self, handle: &mut dyn Placement) -> Result<()> {
        self.ensures.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Device("device lost".into()));
        }
        handle.ensure_resident()
    }
}

fn allow_list() -> VocabularyAllowList {
    VocabularyAllowList::from_words(ALLOWED)
}

fn engine_with(
    source: ScriptedSource,
    config: ExpansionConfig,
    devices: Arc<CountingDevices>,
) -> ConstrainedExpansionEngine<ScriptedSource, WordTokenizer> {
    ConstrainedExpansionEngine::new(WordTokenizer::new(), source, &allow_list(), config, devices)
        .unwrap()
}

fn engine(script: Script) -> ConstrainedExpansionEngine<ScriptedSource, WordTokenizer> {
    engine_with(
        ScriptedSource::new(script),
        ExpansionConfig::default(),
        Arc::new(CountingDevices::default()),
    )
}

/// Words appended after `prompt`.
fn appended_words<'a>(text: &'a str, prompt: &str) -> Vec<&'a str> {
    assert!(text.starts_with(prompt), "{text:?} does not extend {prompt:?}");
    text[prompt.len()..]
        .split([',', ' '])
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .collect()
}

#[test]
fn test_empty_prompt_short_circuits() {
    let source = ScriptedSource::new(Script::Alternating);
    let forwards = Arc::clone(&source.forwards);
    let devices = Arc::new(CountingDevices::default());
    let mut engine = engine_with(source, ExpansionConfig::default(), Arc::clone(&devices));

    for seed in [0, 1, 12345, u64::MAX] {
        let result = engine.expand("", seed).unwrap();
        assert_eq!(result.text, "");
        assert_eq!(result.seed, seed);
    }
    assert_eq!(forwards.load(Ordering::SeqCst), 0);
    assert_eq!(devices.ensures.load(Ordering::SeqCst), 0);
}

#[test]
fn test_block_boundary_returns_prompt_unchanged() {
    let source = ScriptedSource::new(Script::Alternating);
    let forwards = Arc::clone(&source.forwards);
    let config = ExpansionConfig {
        block_size: 8,
        ..ExpansionConfig::default()
    };
    let mut engine = engine_with(source, config, Arc::new(CountingDevices::default()));

    // Seven words plus the appended separator fill one block exactly.
    let result = engine.expand("a cat sitting on a mat red", 9).unwrap();
    assert_eq!(result.text, "a cat sitting on a mat red");
    assert_eq!(result.seed, 9);
    assert_eq!(forwards.load(Ordering::SeqCst), 0);
}

#[test]
fn test_forced_expansion_order() {
    let mut engine = engine(Script::Alternating);
    let result = engine.expand("a cat sitting on a mat", 12345).unwrap();
    assert_eq!(
        result.text,
        "a cat sitting on a mat, red, bright, detailed, cinematic, light, sharp"
    );
    assert_eq!(result.seed, 12345);
}

#[test]
fn test_golden_expansion() {
    let mut engine = engine(Script::Flat);

    let result = engine.expand("a cat sitting on a mat", 12345).unwrap();
    assert_eq!(
        result.text,
        "a cat sitting on a mat, bright sharp detailed red cinematic light"
    );
    assert_eq!(result.seed, 12345);

    let neighbour = engine.expand("a cat sitting on a mat", 12346).unwrap();
    assert_eq!(
        neighbour.text,
        "a cat sitting on a mat, sharp detailed,, light cinematic bright red"
    );
    assert_ne!(neighbour.text, result.text);
}

#[test]
fn test_input_is_sanitized() {
    let mut engine = engine(Script::Alternating);
    let messy = engine.expand("  a  cat   sitting on a mat , ", 1).unwrap();
    let clean = engine.expand("a cat sitting on a mat", 1).unwrap();
    assert_eq!(messy.text, clean.text);
}

#[test]
fn test_same_seed_same_output() {
    let mut engine = engine(Script::Flat);
    let first = engine.expand("a cat sitting on a mat", 777).unwrap();
    let second = engine.expand("a cat sitting on a mat", 777).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_seed_reduced_modulo() {
    let mut engine = engine(Script::Flat);
    let wrapped = engine.expand("a cat", (1u64 << 32) + 5).unwrap();
    let direct = engine.expand("a cat", 5).unwrap();
    assert_eq!(wrapped.seed, 5);
    assert_eq!(wrapped.text, direct.text);
}

#[test]
fn test_only_allowed_words_without_repeats() {
    let mut engine = engine(Script::Flat);
    let allowed: HashSet<&str> = ALLOWED.into_iter().collect();

    for seed in 0..50 {
        let result = engine.expand("a cat sitting on a mat", seed).unwrap();
        let words = appended_words(&result.text, "a cat sitting on a mat");

        let unique: HashSet<&str> = words.iter().copied().collect();
        assert_eq!(unique.len(), words.len(), "repeated word in {:?}", result.text);
        for word in words {
            assert!(allowed.contains(word), "{word:?} is not allowed");
            // Already in the prompt.
            assert_ne!(word, "cat");
        }
    }
}

#[test]
fn test_separator_repeats() {
    let mut engine = ConstrainedExpansionEngine::new(
        WordTokenizer::new(),
        ScriptedSource::new(Script::Alternating),
        &VocabularyAllowList::from_words(["red"]),
        ExpansionConfig::default(),
        Arc::new(CountingDevices::default()),
    )
    .unwrap();

    // Only one allowed word: the rest of the block is separators, which
    // sanitation strips from the end.
    let result = engine.expand("a cat", 3).unwrap();
    assert_eq!(result.text, "a cat, red");
}

#[test]
fn test_residency_ensured_every_call() {
    let source = ScriptedSource::new(Script::Alternating);
    let loads = Arc::clone(&source.loads);
    let devices = Arc::new(CountingDevices::default());
    let mut engine = engine_with(source, ExpansionConfig::default(), Arc::clone(&devices));

    // Loaded once at construction, onto the offload device.
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(engine.handle().residency(), Residency::Offloaded);

    for seed in 0..3 {
        engine.expand("a cat", seed).unwrap();
    }
    assert_eq!(devices.ensures.load(Ordering::SeqCst), 3);
    assert_eq!(engine.handle().residency(), Residency::Resident);

    engine.offload().unwrap();
    assert_eq!(engine.handle().residency(), Residency::Offloaded);
    engine.expand("a cat", 0).unwrap();
    assert_eq!(engine.handle().residency(), Residency::Resident);

    // Same device for load and offload: no reloads.
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_device_failure_propagates() {
    let source = ScriptedSource::new(Script::Alternating);
    let forwards = Arc::clone(&source.forwards);
    let devices = Arc::new(CountingDevices {
        fail: true,
        ..CountingDevices::default()
    });
    let mut engine = engine_with(source, ExpansionConfig::default(), devices);

    let err = engine.expand("a cat", 1).unwrap_err();
    assert!(matches!(err, Error::Device(_)));
    assert_eq!(forwards.load(Ordering::SeqCst), 0);
}

#[test]
fn test_context_overflow() {
    let mut source = ScriptedSource::new(Script::Alternating);
    source.max_positions = 50;
    let mut engine = engine_with(
        source,
        ExpansionConfig::default(),
        Arc::new(CountingDevices::default()),
    );

    let err = engine.expand("a cat", 1).unwrap_err();
    assert!(matches!(
        err,
        Error::ContextOverflow {
            requested: 75,
            max_positions: 50
        }
    ));
}

#[test]
fn test_model_load_failure_at_construction() {
    let mut source = ScriptedSource::new(Script::Alternating);
    source.fail_load = true;
    let result = ConstrainedExpansionEngine::new(
        WordTokenizer::new(),
        source,
        &allow_list(),
        ExpansionConfig::default(),
        Arc::new(CountingDevices::default()),
    );
    assert!(matches!(result, Err(Error::ResourceLoad(_))));
}

#[test]
fn test_unknown_separator_rejected() {
    let config = ExpansionConfig {
        separator: ";".to_string(),
        ..ExpansionConfig::default()
    };
    let result = ConstrainedExpansionEngine::new(
        WordTokenizer::new(),
        ScriptedSource::new(Script::Alternating),
        &allow_list(),
        config,
        Arc::new(CountingDevices::default()),
    );
    assert!(matches!(result, Err(Error::ResourceLoad(_))));
}

#[test]
fn test_bias_covers_model_vocabulary() {
    let engine = engine(Script::Alternating);
    let bias = engine.settings().bias();
    assert_eq!(bias.len(), VOCAB.len());
    assert_eq!(bias.allowed_count(), ALLOWED.len());
    assert!(bias.is_allowed(8));
    assert!(!bias.is_allowed(SEPARATOR));
    assert!(!bias.is_allowed(13));
    assert_eq!(engine.settings().separator_id(), SEPARATOR);
    assert_eq!(engine.settings().eos_id(), Some(0));
}

#[test]
fn test_shared_engine_across_threads() {
    let shared = SharedExpansionEngine::new(engine(Script::Flat));
    let expected = shared.expand("a cat sitting on a mat", 42).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            std::thread::spawn(move || shared.expand("a cat sitting on a mat", 42).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

/// Random-weight GPT-2 behind the model seam.
struct RandomGpt2 {
    config: Gpt2Config,
}

impl ModelSource for RandomGpt2 {
    type Model = Gpt2ForCausalLM;

    fn load(&self, device: &Device, dtype: DType) -> Result<Gpt2ForCausalLM> {
        Ok(Gpt2ForCausalLM::new_random(&self.config, dtype, device)?)
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }
}

#[test]
fn test_expansion_with_random_gpt2() {
    let config: Gpt2Config = serde_json::from_str(
        r#"{ "vocab_size": 32, "n_positions": 32, "n_embd": 32, "n_layer": 2, "n_head": 4 }"#,
    )
    .unwrap();
    let expansion = ExpansionConfig {
        block_size: 16,
        ..ExpansionConfig::default()
    };
    let mut engine = ConstrainedExpansionEngine::new(
        WordTokenizer::new(),
        RandomGpt2 { config },
        &allow_list(),
        expansion,
        Arc::new(CountingDevices::default()),
    )
    .unwrap();

    let first = engine.expand("a cat sitting on a mat", 5).unwrap();
    let second = engine.expand("a cat sitting on a mat", 5).unwrap();
    assert_eq!(first, second);

    let allowed: HashSet<&str> = ALLOWED.into_iter().collect();
    for word in appended_words(&first.text, "a cat sitting on a mat") {
        assert!(allowed.contains(word), "{word:?} is not allowed");
    }
}
