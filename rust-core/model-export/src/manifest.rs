//! On-disk layout of an artifact directory

use crate::contract::ShapeContract;
use crate::ArtifactLoadError;
use anyhow::{Context, Result};
use model_quant::{DType, QuantizationTable, TensorRole, TensorStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PAYLOAD_FILE: &str = "tensors.bin";
pub const CONFIG_FILE: &str = "config.json";
pub const GRAPH_FILE: &str = "graph.json";

/// Preprocessing descriptor and other metadata this crate carries without interpreting
pub type AuxMetadata = serde_json::Map<String, serde_json::Value>;

/// Payload codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum Compression {
    None,
    Zstd { level: i32 },
}

/// Location and integrity data for one tensor inside the decoded payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub name: String,
    pub dtype: DType,
    pub role: TensorRole,
    pub shape: Vec<usize>,
    pub offset: u64,
    pub length: u64,
    pub checksum: String,
}

/// Index of an artifact: how it was written and where every tensor lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub strategy: String,
    pub opset: u32,
    pub traced: bool,
    pub compression: Compression,
    pub contract: ShapeContract,
    pub num_labels: usize,
    pub tensors: Vec<TensorEntry>,
    #[serde(default)]
    pub quantization: QuantizationTable,
    pub payload_bytes: u64,
    pub payload_checksum: String,
}

impl Manifest {
    pub fn entry(&self, name: &str) -> Option<&TensorEntry> {
        self.tensors.iter().find(|e| e.name == name)
    }

    pub fn read(dir: &Path) -> std::result::Result<Self, ArtifactLoadError> {
        read_json(&dir.join(MANIFEST_FILE))
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join(MANIFEST_FILE), self)
    }
}

/// Contents of `config.json`.
///
/// `id2label`/`label2id` are empty until the label patch step has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub architecture: String,
    pub num_labels: usize,
    #[serde(default)]
    pub preprocessing: AuxMetadata,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub id2label: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label2id: BTreeMap<String, usize>,
}

impl ArtifactConfig {
    pub const ARCHITECTURE: &'static str = "SequenceClassifier";

    pub fn new(num_labels: usize, preprocessing: AuxMetadata) -> Self {
        Self {
            architecture: Self::ARCHITECTURE.to_string(),
            num_labels,
            preprocessing,
            id2label: BTreeMap::new(),
            label2id: BTreeMap::new(),
        }
    }

    pub fn read(dir: &Path) -> std::result::Result<Self, ArtifactLoadError> {
        read_json(&dir.join(CONFIG_FILE))
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join(CONFIG_FILE), self)
    }
}

/// Concatenate tensor buffers in store order, returning the raw payload and its index
pub(crate) fn encode_payload(store: &TensorStore) -> (Vec<u8>, Vec<TensorEntry>) {
    let mut payload = Vec::with_capacity(store.total_bytes());
    let mut entries = Vec::with_capacity(store.len());

    for tensor in store {
        let bytes = tensor.to_le_bytes();
        entries.push(TensorEntry {
            name: tensor.name().to_string(),
            dtype: tensor.dtype(),
            role: tensor.role(),
            shape: tensor.shape().to_vec(),
            offset: payload.len() as u64,
            length: bytes.len() as u64,
            checksum: checksum(&bytes),
        });
        payload.extend_from_slice(&bytes);
    }

    (payload, entries)
}

/// Hex-encoded blake3 digest
pub fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> std::result::Result<T, ArtifactLoadError> {
    let bytes = fs::read(path).map_err(|source| ArtifactLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
