//! Forward-pass backends producing one logit per label

use crate::{EngineError, Result};
use model_export::graph::{
    CLASSIFIER_BIAS, CLASSIFIER_WEIGHT, EMBEDDING_WEIGHT, PRE_CLASSIFIER_BIAS, PRE_CLASSIFIER_WEIGHT,
};
use model_export::Artifact;
use ndarray::{Array1, Array2, Axis};

/// Scores a tokenized sequence
pub trait SequenceClassifier: Send + Sync {
    fn num_labels(&self) -> usize;

    /// Raw logits, one per label
    fn forward(&self, input_ids: &[i64], attention_mask: &[i64]) -> Result<Vec<f32>>;
}

/// Dense layer `y = W x + b` with `W` shaped `[out, in]`
#[derive(Debug, Clone)]
struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    fn load(artifact: &Artifact, weight: &str, bias: &str) -> Result<Self> {
        let weight = matrix(artifact, weight)?;
        let bias = vector(artifact, bias)?;
        if bias.len() != weight.nrows() {
            return Err(EngineError::Model(format!(
                "bias has {} entries but weight has {} rows",
                bias.len(),
                weight.nrows()
            )));
        }
        Ok(Self { weight, bias })
    }

    fn apply(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(x) + &self.bias
    }
}

/// Embedding lookup, attention-masked mean pooling, optional
/// `pre_classifier` + ReLU, then the `classifier` head.
///
/// Quantized and half-precision tensors are restored to f32 once, at load.
#[derive(Debug, Clone)]
pub struct PooledLinearClassifier {
    embeddings: Array2<f32>,
    pre_classifier: Option<Linear>,
    classifier: Linear,
}

impl PooledLinearClassifier {
    pub fn from_artifact(artifact: &Artifact) -> Result<Self> {
        let embeddings = matrix(artifact, EMBEDDING_WEIGHT)?;
        let hidden = embeddings.ncols();

        let pre_classifier = if artifact.store().contains(PRE_CLASSIFIER_WEIGHT) {
            let pre = Linear::load(artifact, PRE_CLASSIFIER_WEIGHT, PRE_CLASSIFIER_BIAS)?;
            if pre.weight.dim() != (hidden, hidden) {
                return Err(EngineError::Model(format!(
                    "'{}' has shape {:?}, expected [{}, {}]",
                    PRE_CLASSIFIER_WEIGHT,
                    pre.weight.shape(),
                    hidden,
                    hidden
                )));
            }
            Some(pre)
        } else {
            None
        };

        let classifier = Linear::load(artifact, CLASSIFIER_WEIGHT, CLASSIFIER_BIAS)?;
        if classifier.weight.dim() != (artifact.labels().len(), hidden) {
            return Err(EngineError::Model(format!(
                "'{}' has shape {:?}, expected [{}, {}]",
                CLASSIFIER_WEIGHT,
                classifier.weight.shape(),
                artifact.labels().len(),
                hidden
            )));
        }

        tracing::debug!(
            vocab = embeddings.nrows(),
            hidden,
            pre_classifier = pre_classifier.is_some(),
            "Reference classifier loaded"
        );

        Ok(Self {
            embeddings,
            pre_classifier,
            classifier,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn vocab_size(&self) -> usize {
        self.embeddings.nrows()
    }

    fn pool(&self, input_ids: &[i64], attention_mask: &[i64]) -> Result<Array1<f32>> {
        let mut pooled = Array1::<f32>::zeros(self.hidden_size());
        let mut count = 0usize;

        for (&id, &mask) in input_ids.iter().zip(attention_mask) {
            if mask == 0 {
                continue;
            }
            let row = usize::try_from(id)
                .ok()
                .filter(|&row| row < self.vocab_size())
                .ok_or_else(|| {
                    EngineError::Inference(format!(
                        "token id {} outside vocabulary of {}",
                        id,
                        self.vocab_size()
                    ))
                })?;
            pooled += &self.embeddings.index_axis(Axis(0), row);
            count += 1;
        }

        if count > 0 {
            pooled /= count as f32;
        }
        Ok(pooled)
    }
}

impl SequenceClassifier for PooledLinearClassifier {
    fn num_labels(&self) -> usize {
        self.classifier.weight.nrows()
    }

    fn forward(&self, input_ids: &[i64], attention_mask: &[i64]) -> Result<Vec<f32>> {
        if input_ids.len() != attention_mask.len() {
            return Err(EngineError::Inference(format!(
                "input_ids has {} tokens but attention_mask has {}",
                input_ids.len(),
                attention_mask.len()
            )));
        }

        let mut features = self.pool(input_ids, attention_mask)?;
        if let Some(pre) = &self.pre_classifier {
            features = pre.apply(&features).mapv(|v| v.max(0.0));
        }
        Ok(self.classifier.apply(&features).to_vec())
    }
}

fn matrix(artifact: &Artifact, name: &str) -> Result<Array2<f32>> {
    let tensor = artifact.float_tensor(name)?;
    let &[rows, cols] = tensor.shape() else {
        return Err(EngineError::Model(format!(
            "'{}' has shape {:?}, expected a matrix",
            name,
            tensor.shape()
        )));
    };
    Array2::from_shape_vec((rows, cols), tensor.to_f32_vec()?)
        .map_err(|e| EngineError::Model(format!("'{}': {}", name, e)))
}

fn vector(artifact: &Artifact, name: &str) -> Result<Array1<f32>> {
    let tensor = artifact.float_tensor(name)?;
    if tensor.shape().len() != 1 {
        return Err(EngineError::Model(format!(
            "'{}' has shape {:?}, expected a vector",
            name,
            tensor.shape()
        )));
    }
    Ok(Array1::from(tensor.to_f32_vec()?))
}
