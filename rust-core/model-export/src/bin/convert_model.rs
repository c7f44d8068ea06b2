//! convert-model - re-export a classifier artifact at reduced precision

use anyhow::{Context, Result};
use clap::Parser;
use model_export::{Artifact, ConversionConfig, ConversionPipeline};
use model_quant::{ConversionMode, RolePolicy, TensorRole};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "convert-model")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source artifact directory
    #[arg(short, long)]
    input: PathBuf,

    /// Destination artifact directory
    #[arg(short, long)]
    output: PathBuf,

    /// Precision strategy: int8, fp16 or full
    #[arg(short, long, default_value = "int8")]
    mode: ConversionMode,

    /// Also quantize embedding tables (int8 only)
    #[arg(long)]
    quantize_embeddings: bool,

    /// zstd level for the compressed payload
    #[arg(long, default_value_t = 3)]
    compression_level: i32,

    /// Quantize tensors one at a time
    #[arg(long)]
    sequential: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Loading model from {}...", cli.input.display());
    let source = Artifact::load(&cli.input)
        .with_context(|| format!("Failed to load {}", cli.input.display()))?;
    if source.is_quantized() {
        tracing::warn!("Source artifact is quantized; weights are restored from their quantized values");
    }
    let store = source
        .float_store()
        .context("Failed to restore full-precision tensors")?;

    let mut policy = RolePolicy::weights_only();
    if cli.quantize_embeddings {
        policy = policy.including(TensorRole::Embedding);
    }

    let pipeline = ConversionPipeline::new(ConversionConfig {
        mode: cli.mode,
        policy: Arc::new(policy),
        compression_level: cli.compression_level,
        sequential: cli.sequential,
    });

    let report = pipeline
        .run(store, source.labels(), source.aux(), &cli.output)
        .context("Conversion failed")?;

    tracing::info!(
        "Converted with mode {} ({} tensors quantized): {:.2} MB -> {:.2} MB, {:.1}% smaller, exported via '{}'",
        report.mode,
        report.quantized_tensors,
        report.size.original_mb(),
        report.size.converted_mb(),
        report.size.reduction_percent(),
        report.artifact.manifest().strategy
    );

    Ok(())
}
