//! Two-strategy export with staged publish

use crate::artifact::Artifact;
use crate::manifest::{AuxMetadata, Manifest};
use crate::patch::{ConfigPatcher, MetadataPatcher};
use crate::strategy::{DirectExport, ExportRequest, ExportStrategy, TracedGraphExport};
use crate::ExportError;
use anyhow::Context;
use model_quant::{LabelSchema, QuantizationTable, TensorStore};
use std::fs;
use std::path::{Path, PathBuf};

/// Serializes a converted store into a published artifact directory.
///
/// The primary strategy is tried first; any error from it (including a
/// manifest that breaks the shape contract) triggers the fallback. Labels are
/// patched in afterwards, and the artifact only appears at the target path
/// once both steps have succeeded.
pub struct Exporter {
    primary: Box<dyn ExportStrategy>,
    fallback: Box<dyn ExportStrategy>,
    patcher: Box<dyn MetadataPatcher>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(
            Box::new(TracedGraphExport::default()),
            Box::new(DirectExport::default()),
        )
    }
}

impl Exporter {
    pub fn new(primary: Box<dyn ExportStrategy>, fallback: Box<dyn ExportStrategy>) -> Self {
        Self {
            primary,
            fallback,
            patcher: Box::new(ConfigPatcher),
        }
    }

    /// Replace the label patcher
    pub fn with_patcher(mut self, patcher: Box<dyn MetadataPatcher>) -> Self {
        self.patcher = patcher;
        self
    }

    /// Export `store` to `target`, returning the published artifact
    pub fn export(
        &self,
        store: TensorStore,
        quantization: QuantizationTable,
        labels: &LabelSchema,
        aux: &AuxMetadata,
        target: &Path,
    ) -> Result<Artifact, ExportError> {
        let staging = staging_dir(target)?;
        reset_dir(&staging)?;

        let request = ExportRequest {
            store: &store,
            quantization: &quantization,
            num_labels: labels.len(),
            aux,
        };

        let manifest = match self.attempt(self.primary.as_ref(), &request, &staging) {
            Ok(manifest) => manifest,
            Err(primary_cause) => {
                tracing::warn!(
                    strategy = self.primary.name(),
                    "Primary export failed, trying {}: {:#}",
                    self.fallback.name(),
                    primary_cause
                );
                reset_dir(&staging)?;

                match self.attempt(self.fallback.as_ref(), &request, &staging) {
                    Ok(manifest) => manifest,
                    Err(fallback_cause) => {
                        discard(&staging);
                        return Err(ExportError::StrategiesExhausted {
                            primary: self.primary.name().to_string(),
                            primary_cause,
                            fallback: self.fallback.name().to_string(),
                            fallback_cause,
                        });
                    }
                }
            }
        };

        if let Err(e) = self.patcher.patch_labels(&staging, labels) {
            discard(&staging);
            return Err(e.into());
        }

        if let Err(e) = publish(&staging, target) {
            discard(&staging);
            return Err(e);
        }
        tracing::info!(
            strategy = %manifest.strategy,
            tensors = manifest.tensors.len(),
            "Artifact published to {}",
            target.display()
        );

        Ok(Artifact::from_parts(
            target.to_path_buf(),
            manifest,
            store,
            labels.clone(),
            aux.clone(),
        ))
    }

    fn attempt(
        &self,
        strategy: &dyn ExportStrategy,
        request: &ExportRequest<'_>,
        dir: &Path,
    ) -> anyhow::Result<Manifest> {
        let manifest = strategy.export(request, dir)?;
        manifest
            .contract
            .validate(request.num_labels)
            .with_context(|| format!("strategy '{}' broke the shape contract", strategy.name()))?;
        Ok(manifest)
    }
}

/// `<target>.partial` next to the target
fn staging_dir(target: &Path) -> Result<PathBuf, ExportError> {
    sibling(target, ".partial")
}

fn sibling(target: &Path, suffix: &str) -> Result<PathBuf, ExportError> {
    let Some(name) = target.file_name() else {
        return Err(ExportError::Staging {
            path: target.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "target has no directory name",
            ),
        });
    };
    let mut staged = name.to_os_string();
    staged.push(suffix);
    Ok(target.with_file_name(staged))
}

fn reset_dir(dir: &Path) -> Result<(), ExportError> {
    let staging_err = |source| ExportError::Staging {
        path: dir.to_path_buf(),
        source,
    };
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(staging_err)?;
    }
    fs::create_dir_all(dir).map_err(staging_err)
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!("Failed to remove staging directory {}: {}", dir.display(), e);
    }
}

fn publish(staging: &Path, target: &Path) -> Result<(), ExportError> {
    let publish_err = |source| ExportError::Publish {
        path: target.to_path_buf(),
        source,
    };
    if !target.exists() {
        return fs::rename(staging, target).map_err(publish_err);
    }

    // The previous artifact stays on disk until the new one is in place
    tracing::info!("Replacing existing artifact at {}", target.display());
    let previous = sibling(target, ".previous")?;
    if previous.exists() {
        fs::remove_dir_all(&previous).map_err(publish_err)?;
    }
    fs::rename(target, &previous).map_err(publish_err)?;

    if let Err(e) = fs::rename(staging, target) {
        if let Err(restore) = fs::rename(&previous, target) {
            tracing::error!(
                "Failed to restore previous artifact from {}: {}",
                previous.display(),
                restore
            );
        }
        return Err(publish_err(e));
    }

    discard(&previous);
    Ok(())
}
