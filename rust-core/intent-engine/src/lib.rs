//! Intent classification engine for exported sequence classifiers
//!
//! Loads one artifact, tokenizes request text, runs a forward pass and ranks
//! the label scores. The [`server`] module wraps this in the line-oriented
//! protocol a host application drives over a subprocess's stdin/stdout.

pub mod classifier;
pub mod config;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod protocol;
pub mod ranking;
pub mod server;
pub mod telemetry;
pub mod tokenizer;

// Re-export main types
pub use classifier::{PooledLinearClassifier, SequenceClassifier};
pub use config::{Backend, ServerConfig};
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;
pub use protocol::{Request, Response, ScoredIntent, Status};
pub use ranking::{rank, softmax, top_k, Prediction};
pub use server::{InferenceServer, IntentEngine, ServerState};
pub use telemetry::{ServingStats, TelemetryCollector};
pub use tokenizer::{Encoding, Tokenizer, TokenizerDescriptor, WordPieceTokenizer};

/// Error types for the intent engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("artifact error: {0}")]
    Artifact(#[from] model_export::ArtifactLoadError),

    #[error("tensor error: {0}")]
    Tensor(#[from] model_quant::QuantError),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("operation not allowed while the server is {0:?}")]
    State(server::ServerState),

    #[error("channel error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single request could not be served; the loop carries on
#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error("No text provided")]
    MissingText,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Processing(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
