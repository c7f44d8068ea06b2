//! External input/output shape contract shared by every export strategy

use crate::ContractViolation;
use serde::{Deserialize, Serialize};

pub const INPUT_IDS: &str = "input_ids";
pub const ATTENTION_MASK: &str = "attention_mask";
pub const LOGITS: &str = "logits";

/// Name of the dynamic first axis of every input and output
pub const BATCH_AXIS: &str = "batch";
/// Name of the dynamic second axis of both inputs
pub const SEQUENCE_AXIS: &str = "sequence";

/// One axis of an input or output: a symbolic dynamic size or a fixed extent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(usize),
    Dynamic(String),
}

impl Dim {
    pub fn dynamic(name: &str) -> Self {
        Dim::Dynamic(name.to_string())
    }

    fn is_dynamic(&self, name: &str) -> bool {
        matches!(self, Dim::Dynamic(n) if n == name)
    }
}

/// Element type of a graph input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int64,
    Float32,
    Float16,
}

/// A named graph input or output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSpec {
    pub name: String,
    pub elem_type: ElementType,
    pub dims: Vec<Dim>,
}

/// Inputs and outputs an exported classifier must expose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeContract {
    pub inputs: Vec<IoSpec>,
    pub outputs: Vec<IoSpec>,
}

impl ShapeContract {
    /// `input_ids`/`attention_mask` int64 `[batch, sequence]` in, `logits` float `[batch, num_labels]` out
    pub fn sequence_classifier(num_labels: usize) -> Self {
        let token_input = |name: &str| IoSpec {
            name: name.to_string(),
            elem_type: ElementType::Int64,
            dims: vec![Dim::dynamic(BATCH_AXIS), Dim::dynamic(SEQUENCE_AXIS)],
        };

        Self {
            inputs: vec![token_input(INPUT_IDS), token_input(ATTENTION_MASK)],
            outputs: vec![IoSpec {
                name: LOGITS.to_string(),
                elem_type: ElementType::Float32,
                dims: vec![Dim::dynamic(BATCH_AXIS), Dim::Fixed(num_labels)],
            }],
        }
    }

    pub fn input(&self, name: &str) -> Option<&IoSpec> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&IoSpec> {
        self.outputs.iter().find(|s| s.name == name)
    }

    /// Check the contract against a classifier with `num_labels` classes
    pub fn validate(&self, num_labels: usize) -> Result<(), ContractViolation> {
        for spec in self.inputs.iter().chain(&self.outputs) {
            match spec.dims.first() {
                Some(dim) if dim.is_dynamic(BATCH_AXIS) => {}
                _ => {
                    return Err(violation(format!(
                        "axis 0 of '{}' must be the dynamic '{}' axis",
                        spec.name, BATCH_AXIS
                    )))
                }
            }
        }

        for name in [INPUT_IDS, ATTENTION_MASK] {
            let spec = self
                .input(name)
                .ok_or_else(|| violation(format!("missing input '{}'", name)))?;
            if spec.elem_type != ElementType::Int64 {
                return Err(violation(format!(
                    "input '{}' must be int64, found {:?}",
                    name, spec.elem_type
                )));
            }
            if spec.dims.len() != 2 || !spec.dims[1].is_dynamic(SEQUENCE_AXIS) {
                return Err(violation(format!(
                    "input '{}' must have shape [{}, {}], found {:?}",
                    name, BATCH_AXIS, SEQUENCE_AXIS, spec.dims
                )));
            }
        }

        let logits = self
            .output(LOGITS)
            .ok_or_else(|| violation(format!("missing output '{}'", LOGITS)))?;
        if logits.elem_type == ElementType::Int64 {
            return Err(violation(format!("output '{}' must be a float type", LOGITS)));
        }
        if logits.dims.len() != 2 || logits.dims[1] != Dim::Fixed(num_labels) {
            return Err(violation(format!(
                "output '{}' must have shape [{}, {}], found {:?}",
                LOGITS, BATCH_AXIS, num_labels, logits.dims
            )));
        }

        Ok(())
    }
}

fn violation(message: String) -> ContractViolation {
    ContractViolation(message)
}
