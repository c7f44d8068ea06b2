//! Portable artifact export and loading for converted classifiers
//!
//! An artifact is a directory holding the tensor payload, a manifest that
//! indexes it (shape contract, tensor table, quantization parameters,
//! checksums) and a `config.json` carrying the label mapping and the opaque
//! preprocessing descriptor. Export tries a primary strategy, falls back to a
//! simpler one, patches the label metadata as its own step and only then
//! publishes the directory.

use std::path::PathBuf;

pub mod artifact;
pub mod contract;
pub mod exporter;
pub mod graph;
pub mod manifest;
pub mod patch;
pub mod pipeline;
pub mod strategy;

// Re-export main types
pub use artifact::Artifact;
pub use contract::{Dim, ElementType, IoSpec, ShapeContract};
pub use exporter::Exporter;
pub use manifest::{ArtifactConfig, AuxMetadata, Compression, Manifest, TensorEntry};
pub use patch::{ConfigPatcher, MetadataPatcher};
pub use pipeline::{ConversionConfig, ConversionPipeline, ConversionReport};
pub use strategy::{DirectExport, ExportRequest, ExportStrategy, TracedGraphExport};

/// Export failure surfaced to the conversion caller
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(
        "export failed: primary strategy '{primary}' failed: {primary_cause:#}; \
         fallback strategy '{fallback}' failed: {fallback_cause:#}"
    )]
    StrategiesExhausted {
        primary: String,
        primary_cause: anyhow::Error,
        fallback: String,
        fallback_cause: anyhow::Error,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("failed to prepare staging directory {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to publish artifact to {}: {source}", .path.display())]
    Publish {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Label metadata could not be written after a successful structural export
#[derive(thiserror::Error, Debug)]
#[error("failed to patch label metadata in {}: {reason}", .path.display())]
pub struct PatchError {
    pub path: PathBuf,
    pub reason: String,
}

impl PatchError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// An exported artifact does not honor the input/output shape contract
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("shape contract violated: {0}")]
pub struct ContractViolation(pub String);

/// Artifact could not be loaded
#[derive(thiserror::Error, Debug)]
pub enum ArtifactLoadError {
    #[error("artifact directory {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unsupported artifact format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("checksum mismatch for {what}: expected {expected}, got {actual}")]
    Checksum {
        what: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error("invalid artifact contents: {0}")]
    Invalid(#[from] model_quant::QuantError),

    #[error("corrupt artifact: {0}")]
    Corrupt(String),
}

/// Conversion pipeline failure, naming the stage that failed
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("quantization failed: {0}")]
    Quantization(#[from] model_quant::QuantError),

    #[error(transparent)]
    Export(#[from] ExportError),
}
