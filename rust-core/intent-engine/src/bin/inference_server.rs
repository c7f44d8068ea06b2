//! inference-server - intent classification over stdin/stdout
//!
//! Reads `{"text": ...}` lines from stdin and answers each with one JSON line
//! on stdout. Logs go to stderr so they never interleave with responses.

use clap::Parser;
use intent_engine::{Backend, InferenceServer, ServerConfig};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "inference-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Artifact directory [env: INTENT_MODEL_PATH, default: models/intent-classifier]
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Ranked intents per response [env: INTENT_TOP_K, default: 3]
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Maximum tokens per request, [CLS] and [SEP] included
    #[arg(long)]
    max_length: Option<usize>,

    /// Forward-pass backend: reference or onnx
    #[arg(short, long, default_value = "reference")]
    backend: Backend,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::from_env();
        if let Some(model) = &self.model {
            config.model_path = model.clone();
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(max_length) = self.max_length {
            config.max_length = max_length;
        }
        config.backend = self.backend;
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).with_ansi(false))
        .init();

    let config = cli.server_config();
    let stdout = io::stdout();
    let mut server = InferenceServer::new(stdout.lock());

    if let Err(e) = server.load(&config) {
        tracing::error!("Startup failed: {}", e);
        return ExitCode::FAILURE;
    }

    match server.serve(io::stdin().lock()) {
        Ok(stats) => {
            tracing::info!(
                requests = stats.total_requests,
                errors = stats.errors,
                "Inference server stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Serving stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
