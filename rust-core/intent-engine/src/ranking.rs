//! Softmax and top-k selection over label scores

use crate::{EngineError, Result};

/// One ranked label index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub confidence: f64,
}

/// Numerically stable softmax in f64.
///
/// The maximum is subtracted before exponentiating so large logits cannot
/// overflow.
pub fn softmax(scores: &[f32]) -> Vec<f64> {
    let max = scores
        .iter()
        .map(|&s| s as f64)
        .fold(f64::NEG_INFINITY, f64::max);

    let exps: Vec<f64> = scores.iter().map(|&s| (s as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// The `k` highest probabilities, descending; equal values keep the lower index first.
///
/// Returns `min(k, probabilities.len())` entries.
pub fn top_k(probabilities: &[f64], k: usize) -> Vec<Prediction> {
    let mut ranked: Vec<Prediction> = probabilities
        .iter()
        .enumerate()
        .map(|(index, &confidence)| Prediction { index, confidence })
        .collect();

    // Stable sort keeps ascending index order among ties
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked.truncate(k);
    ranked
}

/// Softmax followed by top-k, rejecting non-finite logits
pub fn rank(scores: &[f32], k: usize) -> Result<Vec<Prediction>> {
    if scores.is_empty() {
        return Err(EngineError::Inference("model produced no scores".to_string()));
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(EngineError::Inference(format!(
            "non-finite score {} for label {}",
            scores[index], index
        )));
    }
    Ok(top_k(&softmax(scores), k))
}
