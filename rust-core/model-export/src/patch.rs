//! Label metadata injection after structural export

use crate::manifest::CONFIG_FILE;
use crate::PatchError;
use model_quant::LabelSchema;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Writes the index/label mapping into an exported artifact's metadata
pub trait MetadataPatcher: Send + Sync {
    fn patch_labels(&self, dir: &Path, labels: &LabelSchema) -> Result<(), PatchError>;
}

/// Patches `config.json` in place, keeping every field it does not own
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigPatcher;

impl MetadataPatcher for ConfigPatcher {
    fn patch_labels(&self, dir: &Path, labels: &LabelSchema) -> Result<(), PatchError> {
        let path = dir.join(CONFIG_FILE);
        let raw = fs::read(&path).map_err(|e| PatchError::new(&path, e.to_string()))?;
        let mut config: Value =
            serde_json::from_slice(&raw).map_err(|e| PatchError::new(&path, e.to_string()))?;

        let Some(object) = config.as_object_mut() else {
            return Err(PatchError::new(&path, "config is not a JSON object"));
        };

        if let Some(declared) = object.get("num_labels").and_then(Value::as_u64) {
            if declared as usize != labels.len() {
                return Err(PatchError::new(
                    &path,
                    format!(
                        "artifact declares {} labels but the schema has {}",
                        declared,
                        labels.len()
                    ),
                ));
            }
        }

        let id2label = serde_json::to_value(labels.id2label())
            .map_err(|e| PatchError::new(&path, e.to_string()))?;
        let label2id = serde_json::to_value(labels.label2id())
            .map_err(|e| PatchError::new(&path, e.to_string()))?;
        object.insert("num_labels".to_string(), Value::from(labels.len()));
        object.insert("id2label".to_string(), id2label);
        object.insert("label2id".to_string(), label2id);

        let bytes =
            serde_json::to_vec_pretty(&config).map_err(|e| PatchError::new(&path, e.to_string()))?;

        // Write then rename so config.json is never left half-written
        let staged = dir.join(format!("{}.tmp", CONFIG_FILE));
        fs::write(&staged, bytes).map_err(|e| PatchError::new(&staged, e.to_string()))?;
        fs::rename(&staged, &path).map_err(|e| PatchError::new(&path, e.to_string()))?;

        tracing::debug!(labels = labels.len(), "label metadata patched");
        Ok(())
    }
}
