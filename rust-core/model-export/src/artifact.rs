//! Loading published artifacts
//!
//! The payload is read through a read-only memory map, decompressed when the
//! manifest says so, and checked against the manifest's blake3 digests before
//! any tensor is rebuilt.

use crate::manifest::{
    checksum, ArtifactConfig, AuxMetadata, Compression, Manifest, FORMAT_VERSION, PAYLOAD_FILE,
};
use crate::ArtifactLoadError;
use memmap2::Mmap;
use model_quant::{
    DType, LabelSchema, QuantError, QuantizationParams, QuantizationTable, Quantizer, Tensor,
    TensorData, TensorStore,
};
use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A converted classifier: tensors, label schema and auxiliary metadata.
///
/// Read-only once created.
#[derive(Debug, Clone)]
pub struct Artifact {
    root: PathBuf,
    manifest: Manifest,
    store: TensorStore,
    labels: LabelSchema,
    aux: AuxMetadata,
}

impl Artifact {
    pub(crate) fn from_parts(
        root: PathBuf,
        manifest: Manifest,
        store: TensorStore,
        labels: LabelSchema,
        aux: AuxMetadata,
    ) -> Self {
        Self {
            root,
            manifest,
            store,
            labels,
            aux,
        }
    }

    /// Load and verify an artifact directory
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ArtifactLoadError> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ArtifactLoadError::Missing(root));
        }

        let manifest = Manifest::read(&root)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(ArtifactLoadError::UnsupportedVersion {
                found: manifest.format_version,
                expected: FORMAT_VERSION,
            });
        }
        manifest.contract.validate(manifest.num_labels)?;

        let config = ArtifactConfig::read(&root)?;
        if config.id2label.is_empty() {
            return Err(ArtifactLoadError::Corrupt(
                "config.json has no id2label mapping".to_string(),
            ));
        }
        let labels = LabelSchema::from_id2label(&config.id2label)?;
        if labels.len() != manifest.num_labels {
            return Err(ArtifactLoadError::Corrupt(format!(
                "manifest declares {} labels but config maps {}",
                manifest.num_labels,
                labels.len()
            )));
        }

        let store = read_payload(&root, &manifest)?;
        for (name, params) in &manifest.quantization {
            let tensor = store.require(name)?;
            if tensor.dtype() != params.dtype {
                return Err(ArtifactLoadError::Corrupt(format!(
                    "tensor '{}' has quantization parameters but dtype {}",
                    name,
                    tensor.dtype()
                )));
            }
            if !(params.scale.is_finite() && params.scale > 0.0) || !params.zero_point.is_finite() {
                return Err(ArtifactLoadError::Corrupt(format!(
                    "tensor '{}' has invalid quantization parameters (scale {}, zero point {})",
                    name, params.scale, params.zero_point
                )));
            }
        }

        tracing::debug!(
            strategy = %manifest.strategy,
            tensors = store.len(),
            labels = labels.len(),
            "Artifact loaded from {}",
            root.display()
        );

        Ok(Self {
            root,
            manifest,
            store,
            labels,
            aux: config.preprocessing,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn store(&self) -> &TensorStore {
        &self.store
    }

    pub fn labels(&self) -> &LabelSchema {
        &self.labels
    }

    pub fn aux(&self) -> &AuxMetadata {
        &self.aux
    }

    pub fn quantization(&self) -> &QuantizationTable {
        &self.manifest.quantization
    }

    pub fn quantization_params(&self, name: &str) -> Option<&QuantizationParams> {
        self.manifest.quantization.get(name)
    }

    /// A tensor restored to float32, dequantizing or widening as needed
    pub fn float_tensor(&self, name: &str) -> Result<Tensor, QuantError> {
        let tensor = self.store.require(name)?;
        match tensor.data() {
            TensorData::Float32(_) => Ok(tensor.clone()),
            TensorData::Float16(_) => tensor.with_data(TensorData::Float32(tensor.to_f32_vec()?)),
            TensorData::Uint8(_) => {
                let params = self.quantization_params(name).ok_or_else(|| {
                    QuantError::InvalidTensorData {
                        tensor: name.to_string(),
                        reason: "uint8 tensor without quantization parameters".to_string(),
                    }
                })?;
                Quantizer::sequential().dequantize(tensor, params)
            }
        }
    }

    /// Every tensor restored to float32, in store order
    pub fn float_store(&self) -> Result<TensorStore, QuantError> {
        let tensors = self
            .store
            .names()
            .map(|name| self.float_tensor(name))
            .collect::<Result<Vec<_>, _>>()?;
        TensorStore::from_tensors(tensors)
    }

    pub fn is_quantized(&self) -> bool {
        self.store.iter().any(|t| t.dtype() == DType::Uint8)
    }
}

fn read_payload(root: &Path, manifest: &Manifest) -> Result<TensorStore, ArtifactLoadError> {
    let path = root.join(PAYLOAD_FILE);
    let io_err = |source| ArtifactLoadError::Io {
        path: path.clone(),
        source,
    };

    let file = File::open(&path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();
    let mmap = if len > 0 {
        // Safety: the mapping is read-only and dropped before this function returns
        Some(unsafe { Mmap::map(&file) }.map_err(io_err)?)
    } else {
        None
    };
    let encoded: &[u8] = mmap.as_deref().unwrap_or(&[]);

    let payload: Cow<'_, [u8]> = match manifest.compression {
        Compression::None => Cow::Borrowed(encoded),
        Compression::Zstd { .. } => Cow::Owned(zstd::decode_all(encoded).map_err(io_err)?),
    };

    if payload.len() as u64 != manifest.payload_bytes {
        return Err(ArtifactLoadError::Corrupt(format!(
            "payload is {} bytes, manifest expects {}",
            payload.len(),
            manifest.payload_bytes
        )));
    }
    verify(PAYLOAD_FILE, &manifest.payload_checksum, &payload)?;

    let mut store = TensorStore::new();
    for entry in &manifest.tensors {
        let start = entry.offset as usize;
        let end = start
            .checked_add(entry.length as usize)
            .filter(|&end| end <= payload.len())
            .ok_or_else(|| {
                ArtifactLoadError::Corrupt(format!("tensor '{}' lies outside the payload", entry.name))
            })?;
        let bytes = &payload[start..end];
        verify(&entry.name, &entry.checksum, bytes)?;

        store.insert(Tensor::from_le_bytes(
            entry.name.clone(),
            entry.shape.clone(),
            entry.role,
            entry.dtype,
            bytes,
        )?)?;
    }

    Ok(store)
}

fn verify(what: &str, expected: &str, bytes: &[u8]) -> Result<(), ArtifactLoadError> {
    let actual = checksum(bytes);
    if actual != expected {
        return Err(ArtifactLoadError::Checksum {
            what: what.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
