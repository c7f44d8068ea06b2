//! Serving configuration

use crate::tokenizer::DEFAULT_MAX_LENGTH;
use std::path::PathBuf;
use std::str::FromStr;

/// Artifact directory used when nothing else is configured
pub const DEFAULT_MODEL_PATH: &str = "models/intent-classifier";
/// Number of ranked intents per response
pub const DEFAULT_TOP_K: usize = 3;

pub const ENV_MODEL_PATH: &str = "INTENT_MODEL_PATH";
pub const ENV_TOP_K: &str = "INTENT_TOP_K";

/// Forward-pass implementation used to score requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Pure-Rust pass over the artifact's tensors
    #[default]
    Reference,
    /// ONNX Runtime over `model.onnx` (feature `onnx`)
    Onnx,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Reference => "reference",
            Backend::Onnx => "onnx",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" | "ndarray" => Ok(Backend::Reference),
            "onnx" | "ort" => Ok(Backend::Onnx),
            other => Err(format!("unknown backend '{}' (expected reference or onnx)", other)),
        }
    }
}

/// Inference server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub model_path: PathBuf,
    pub top_k: usize,
    /// Token budget per request, including `[CLS]` and `[SEP]`
    pub max_length: usize,
    pub backend: Backend,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            top_k: DEFAULT_TOP_K,
            max_length: DEFAULT_MAX_LENGTH,
            backend: Backend::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `INTENT_MODEL_PATH` and `INTENT_TOP_K`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_MODEL_PATH).filter(|p| !p.trim().is_empty()) {
            config.model_path = PathBuf::from(path);
        }

        if let Some(raw) = lookup(ENV_TOP_K) {
            match raw.trim().parse::<usize>() {
                Ok(k) if k > 0 => config.top_k = k,
                _ => tracing::warn!("Ignoring invalid {}={:?}", ENV_TOP_K, raw),
            }
        }

        config
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = path.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}
