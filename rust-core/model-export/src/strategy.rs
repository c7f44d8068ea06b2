//! Structural serialization strategies
//!
//! A strategy writes the tensor payload, the manifest and an unpatched
//! `config.json` into a directory. Label metadata is deliberately left out;
//! the exporter injects it afterwards as a separate step.

use crate::contract::ShapeContract;
use crate::graph::trace_classifier;
use crate::manifest::{
    checksum, encode_payload, write_json, ArtifactConfig, AuxMetadata, Compression, Manifest,
    FORMAT_VERSION, GRAPH_FILE, PAYLOAD_FILE,
};
use anyhow::{Context, Result};
use model_quant::{QuantizationTable, TensorStore};
use std::fs;
use std::path::Path;

/// Everything a strategy needs to serialize a converted store
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub store: &'a TensorStore,
    pub quantization: &'a QuantizationTable,
    pub num_labels: usize,
    pub aux: &'a AuxMetadata,
}

/// One way of turning a store into an artifact directory
pub trait ExportStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Write the structural artifact into `dir` and return its manifest
    fn export(&self, request: &ExportRequest<'_>, dir: &Path) -> Result<Manifest>;
}

/// Primary strategy: traces the classifier dataflow into `graph.json` and
/// compresses the payload
#[derive(Debug, Clone)]
pub struct TracedGraphExport {
    pub opset: u32,
    pub compression_level: i32,
}

impl Default for TracedGraphExport {
    fn default() -> Self {
        Self {
            opset: 14,
            compression_level: 3,
        }
    }
}

impl ExportStrategy for TracedGraphExport {
    fn name(&self) -> &str {
        "traced-graph"
    }

    fn export(&self, request: &ExportRequest<'_>, dir: &Path) -> Result<Manifest> {
        let graph = trace_classifier(request.store, request.num_labels, self.opset)?;
        write_json(&dir.join(GRAPH_FILE), &graph)?;

        write_structural(
            request,
            dir,
            self.name(),
            self.opset,
            true,
            Compression::Zstd {
                level: self.compression_level,
            },
        )
    }
}

/// Fallback strategy: flat, uncompressed tensor archive with no traced graph
#[derive(Debug, Clone)]
pub struct DirectExport {
    pub opset: u32,
}

impl Default for DirectExport {
    fn default() -> Self {
        Self { opset: 12 }
    }
}

impl ExportStrategy for DirectExport {
    fn name(&self) -> &str {
        "direct"
    }

    fn export(&self, request: &ExportRequest<'_>, dir: &Path) -> Result<Manifest> {
        write_structural(request, dir, self.name(), self.opset, false, Compression::None)
    }
}

/// Payload, unpatched config and manifest, shared by both built-in strategies
fn write_structural(
    request: &ExportRequest<'_>,
    dir: &Path,
    strategy: &str,
    opset: u32,
    traced: bool,
    compression: Compression,
) -> Result<Manifest> {
    let (payload, tensors) = encode_payload(request.store);
    let payload_checksum = checksum(&payload);
    let payload_bytes = payload.len() as u64;

    let encoded = match compression {
        Compression::None => payload,
        Compression::Zstd { level } => {
            zstd::encode_all(&payload[..], level).context("Failed to compress tensor payload")?
        }
    };
    let payload_path = dir.join(PAYLOAD_FILE);
    fs::write(&payload_path, &encoded)
        .with_context(|| format!("Failed to write {}", payload_path.display()))?;

    ArtifactConfig::new(request.num_labels, request.aux.clone()).write(dir)?;

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        strategy: strategy.to_string(),
        opset,
        traced,
        compression,
        contract: ShapeContract::sequence_classifier(request.num_labels),
        num_labels: request.num_labels,
        tensors,
        quantization: request.quantization.clone(),
        payload_bytes,
        payload_checksum,
    };
    manifest.write(dir)?;

    tracing::debug!(
        strategy,
        tensors = manifest.tensors.len(),
        payload_bytes,
        written_bytes = encoded.len(),
        "structural export written"
    );

    Ok(manifest)
}
