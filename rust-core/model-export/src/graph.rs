//! Dataflow trace of the pooled sequence classifier

use crate::contract::{ATTENTION_MASK, INPUT_IDS, LOGITS};
use anyhow::{bail, ensure, Result};
use model_quant::{Tensor, TensorStore};
use serde::{Deserialize, Serialize};

pub const EMBEDDING_WEIGHT: &str = "embeddings.word_embeddings.weight";
pub const PRE_CLASSIFIER_WEIGHT: &str = "pre_classifier.weight";
pub const PRE_CLASSIFIER_BIAS: &str = "pre_classifier.bias";
pub const CLASSIFIER_WEIGHT: &str = "classifier.weight";
pub const CLASSIFIER_BIAS: &str = "classifier.bias";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub op: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl GraphNode {
    fn new(op: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            op: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Ordered op list from the graph inputs to `logits`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub opset: u32,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub nodes: Vec<GraphNode>,
}

/// Trace embedding lookup, masked mean pooling, optional pre-classifier and classifier head.
///
/// Fails when the store's layout is not one this trace understands.
pub fn trace_classifier(store: &TensorStore, num_labels: usize, opset: u32) -> Result<Graph> {
    let embedding = matrix(store, EMBEDDING_WEIGHT)?;
    let hidden = embedding.shape()[1];

    let mut nodes = vec![
        GraphNode::new("Gather", &[EMBEDDING_WEIGHT, INPUT_IDS], &["hidden_states"]),
        GraphNode::new("MaskedReduceMean", &["hidden_states", ATTENTION_MASK], &["pooled"]),
    ];
    let mut features = "pooled";

    if store.contains(PRE_CLASSIFIER_WEIGHT) {
        let pre = matrix(store, PRE_CLASSIFIER_WEIGHT)?;
        ensure!(
            pre.shape() == [hidden, hidden],
            "'{}' has shape {:?}, expected [{}, {}]",
            PRE_CLASSIFIER_WEIGHT,
            pre.shape(),
            hidden,
            hidden
        );
        vector(store, PRE_CLASSIFIER_BIAS, hidden)?;

        nodes.push(GraphNode::new(
            "Gemm",
            &[features, PRE_CLASSIFIER_WEIGHT, PRE_CLASSIFIER_BIAS],
            &["pre_logits"],
        ));
        nodes.push(GraphNode::new("Relu", &["pre_logits"], &["activated"]));
        features = "activated";
    }

    let classifier = matrix(store, CLASSIFIER_WEIGHT)?;
    ensure!(
        classifier.shape() == [num_labels, hidden],
        "'{}' has shape {:?}, expected [{}, {}]",
        CLASSIFIER_WEIGHT,
        classifier.shape(),
        num_labels,
        hidden
    );
    vector(store, CLASSIFIER_BIAS, num_labels)?;

    nodes.push(GraphNode::new(
        "Gemm",
        &[features, CLASSIFIER_WEIGHT, CLASSIFIER_BIAS],
        &[LOGITS],
    ));

    Ok(Graph {
        opset,
        inputs: vec![INPUT_IDS.to_string(), ATTENTION_MASK.to_string()],
        outputs: vec![LOGITS.to_string()],
        nodes,
    })
}

fn matrix<'a>(store: &'a TensorStore, name: &str) -> Result<&'a Tensor> {
    let Some(tensor) = store.get(name) else {
        bail!("cannot trace classifier: tensor '{}' not found", name);
    };
    ensure!(
        tensor.shape().len() == 2,
        "cannot trace classifier: '{}' has rank {}, expected 2",
        name,
        tensor.shape().len()
    );
    Ok(tensor)
}

fn vector<'a>(store: &'a TensorStore, name: &str, len: usize) -> Result<&'a Tensor> {
    let Some(tensor) = store.get(name) else {
        bail!("cannot trace classifier: tensor '{}' not found", name);
    };
    ensure!(
        tensor.shape() == [len],
        "cannot trace classifier: '{}' has shape {:?}, expected [{}]",
        name,
        tensor.shape(),
        len
    );
    Ok(tensor)
}
