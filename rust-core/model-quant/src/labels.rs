//! Bijection between class indices and label names

use crate::{QuantError, Result};
use std::collections::{BTreeMap, HashMap};

/// Ordered label set whose indices always form the dense range `[0, N)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelSchema {
    /// Build a schema where each label's position is its class index
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(QuantError::InvalidLabelSchema("schema has no labels".to_string()));
        }

        let mut index = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(QuantError::InvalidLabelSchema(format!("label {} is empty", i)));
            }
            if let Some(previous) = index.insert(label.clone(), i) {
                return Err(QuantError::InvalidLabelSchema(format!(
                    "label '{}' is assigned to both {} and {}",
                    label, previous, i
                )));
            }
        }

        Ok(Self { labels, index })
    }

    /// Build a schema from explicit `(index, label)` pairs in any order.
    ///
    /// Fails on gaps, repeated indices or repeated labels.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, S)>,
        S: Into<String>,
    {
        let mut by_index: BTreeMap<usize, String> = BTreeMap::new();
        for (i, label) in pairs {
            if by_index.insert(i, label.into()).is_some() {
                return Err(QuantError::InvalidLabelSchema(format!("index {} appears twice", i)));
            }
        }

        for (expected, &actual) in by_index.keys().enumerate() {
            if expected != actual {
                return Err(QuantError::InvalidLabelSchema(format!(
                    "indices are not dense: missing {}",
                    expected
                )));
            }
        }

        Self::new(by_index.into_values())
    }

    /// Parse an `id2label` table whose keys are decimal indices
    pub fn from_id2label(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut pairs = Vec::with_capacity(map.len());
        for (key, label) in map {
            let i = key.trim().parse::<usize>().map_err(|_| {
                QuantError::InvalidLabelSchema(format!("'{}' is not a class index", key))
            })?;
            pairs.push((i, label.clone()));
        }
        Self::from_pairs(pairs)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false; a schema holds at least one label
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Labels in class-index order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().enumerate().map(|(i, l)| (i, l.as_str()))
    }

    /// `{"0": "navigate", ...}` as stored in model configs
    pub fn id2label(&self) -> BTreeMap<String, String> {
        self.iter().map(|(i, l)| (i.to_string(), l.to_string())).collect()
    }

    /// `{"navigate": 0, ...}`
    pub fn label2id(&self) -> BTreeMap<String, usize> {
        self.iter().map(|(i, l)| (l.to_string(), i)).collect()
    }
}
