use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prompt_expansion::{
    ConstrainedExpansionEngine, DeviceKind, ExpansionConfig, ExpansionRequest, LocalDeviceManager,
};

#[derive(Parser, Debug)]
#[command(name = "prompt-expansion")]
#[command(about = "Expand an image prompt with a vocabulary-constrained GPT-2")]
struct Args {
    /// Prompt to expand
    #[arg(short, long)]
    text: String,

    /// Seed; a random one is drawn when omitted
    #[arg(short, long, allow_negative_numbers = true)]
    seed: Option<i64>,

    /// Log the new suffix and the final prompt
    #[arg(long)]
    log_prompt: bool,

    /// Directory holding config.json, tokenizer.json, weights and word list
    #[arg(short, long, default_value = "fooocus_expansion")]
    model_dir: PathBuf,

    /// Compute device
    #[arg(long, value_enum, default_value_t = DeviceKind::Auto)]
    device: DeviceKind,

    /// JSON file overriding expansion settings
    #[arg(long)]
    config: Option<PathBuf>,
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging();

    let config = match &args.config {
        Some(path) => ExpansionConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ExpansionConfig::default(),
    };

    let request = ExpansionRequest::from_host(&args.text, args.seed, &mut rand::thread_rng());

    let devices = Arc::new(LocalDeviceManager::new(args.device)?);
    let mut engine = ConstrainedExpansionEngine::load(&args.model_dir, config, devices)
        .with_context(|| format!("failed to load resources from {}", args.model_dir.display()))?;

    let result = engine.expand_request(&request)?;

    if args.log_prompt {
        tracing::info!("[Prompt Expansion] New suffix: {}", result.suffix(&request.prompt));
        tracing::info!("[Prompt Expansion] Final prompt: {}", result.text);
    }
    println!("{}", result.text);
    println!("seed: {}", result.seed);

    Ok(())
}
