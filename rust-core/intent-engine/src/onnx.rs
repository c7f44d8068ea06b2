//! ONNX Runtime backend for artifacts that ship a `model.onnx`

use crate::classifier::SequenceClassifier;
use crate::{EngineError, Result};
use model_export::Artifact;
use ndarray::{Array2, CowArray};
use ort::{Environment, GraphOptimizationLevel, LoggingLevel, Session, SessionBuilder, Value};
use std::path::Path;

/// Serialized graph looked up inside the artifact directory
pub const ONNX_MODEL_FILE: &str = "model.onnx";

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub optimization_level: GraphOptimizationLevel,
    pub intra_threads: i16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            optimization_level: GraphOptimizationLevel::Level3,
            // Requests are scored one at a time
            intra_threads: 1,
        }
    }
}

/// Classifier running the exported graph through ONNX Runtime
pub struct OnnxClassifier {
    session: Session,
    num_labels: usize,
}

impl OnnxClassifier {
    pub fn from_artifact(artifact: &Artifact) -> Result<Self> {
        Self::new(
            artifact.root().join(ONNX_MODEL_FILE),
            artifact.labels().len(),
            SessionConfig::default(),
        )
    }

    pub fn new<P: AsRef<Path>>(model_path: P, num_labels: usize, config: SessionConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(EngineError::Model(format!(
                "{} not found",
                model_path.display()
            )));
        }

        let environment = Environment::builder()
            .with_name("intent_engine")
            .with_log_level(LoggingLevel::Warning)
            .build()
            .map_err(ort_error("failed to create ONNX environment"))?
            .into_arc();

        let session = SessionBuilder::new(&environment)
            .map_err(ort_error("failed to create session builder"))?
            .with_optimization_level(config.optimization_level)
            .map_err(ort_error("failed to set optimization level"))?
            .with_intra_threads(config.intra_threads)
            .map_err(ort_error("failed to set intra threads"))?
            .with_model_from_file(model_path)
            .map_err(ort_error("failed to load ONNX model"))?;

        tracing::info!("ONNX session ready for {}", model_path.display());
        Ok(Self {
            session,
            num_labels,
        })
    }
}

impl SequenceClassifier for OnnxClassifier {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, input_ids: &[i64], attention_mask: &[i64]) -> Result<Vec<f32>> {
        let shape = (1, input_ids.len());
        let ids = Array2::from_shape_vec(shape, input_ids.to_vec())
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let mask = Array2::from_shape_vec(shape, attention_mask.to_vec())
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let ids = CowArray::from(ids).into_dyn();
        let mask = CowArray::from(mask).into_dyn();

        let inputs = vec![
            Value::from_array(self.session.allocator(), &ids)
                .map_err(ort_error("failed to create input_ids tensor"))?,
            Value::from_array(self.session.allocator(), &mask)
                .map_err(ort_error("failed to create attention_mask tensor"))?,
        ];

        let outputs = self
            .session
            .run(inputs)
            .map_err(ort_error("failed to run inference"))?;
        let logits = outputs
            .first()
            .ok_or_else(|| EngineError::Inference("model produced no outputs".to_string()))?
            .try_extract::<f32>()
            .map_err(ort_error("failed to extract logits"))?;

        let scores: Vec<f32> = logits.view().iter().copied().collect();
        if scores.len() != self.num_labels {
            return Err(EngineError::Inference(format!(
                "model produced {} logits for {} labels",
                scores.len(),
                self.num_labels
            )));
        }
        Ok(scores)
    }
}

fn ort_error(context: &'static str) -> impl Fn(ort::OrtError) -> EngineError {
    move |e| EngineError::Model(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxClassifier::new(dir.path().join(ONNX_MODEL_FILE), 9, SessionConfig::default());
        assert!(matches!(result, Err(EngineError::Model(_))));
    }
}
