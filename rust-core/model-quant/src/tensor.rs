//! Named parameter tensors and the insertion-ordered store that holds them

use crate::{QuantError, Result};
use half::f16;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Element type of a tensor buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Float16,
    Uint8,
}

impl DType {
    /// Bytes per element, used for size accounting and payload encoding
    pub fn byte_width(self) -> usize {
        match self {
            DType::Float32 => 4,
            DType::Float16 => 2,
            DType::Uint8 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float16 => "float16",
            DType::Uint8 => "uint8",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a parameter does inside the network.
///
/// Quantization policies select on this tag instead of guessing from the
/// parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorRole {
    Weight,
    Bias,
    Norm,
    Embedding,
    Other,
}

/// Flat element buffer, one variant per supported dtype
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float32(Vec<f32>),
    Float16(Vec<f16>),
    Uint8(Vec<u8>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float32(v) => v.len(),
            TensorData::Float16(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Float32(_) => DType::Float32,
            TensorData::Float16(_) => DType::Float16,
            TensorData::Uint8(_) => DType::Uint8,
        }
    }
}

/// A named tensor whose buffer length always equals the product of its shape
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    name: String,
    shape: Vec<usize>,
    role: TensorRole,
    data: TensorData,
}

impl Tensor {
    /// Create a tensor, checking the buffer against the shape
    pub fn new(
        name: impl Into<String>,
        shape: Vec<usize>,
        role: TensorRole,
        data: TensorData,
    ) -> Result<Self> {
        let name = name.into();
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(QuantError::ShapeMismatch {
                tensor: name,
                shape,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            name,
            shape,
            role,
            data,
        })
    }

    /// Create a float32 tensor
    pub fn from_f32(
        name: impl Into<String>,
        shape: Vec<usize>,
        role: TensorRole,
        values: Vec<f32>,
    ) -> Result<Self> {
        Self::new(name, shape, role, TensorData::Float32(values))
    }

    /// Same name, shape and role with a different buffer
    pub fn with_data(&self, data: TensorData) -> Result<Self> {
        Self::new(self.name.clone(), self.shape.clone(), self.role, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn role(&self) -> TensorRole {
        self.role
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Storage footprint in bytes
    pub fn byte_size(&self) -> usize {
        self.len() * self.dtype().byte_width()
    }

    /// Widen a floating-point buffer to f32.
    ///
    /// Quantized tensors need their parameters to be restored and are rejected here.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match &self.data {
            TensorData::Float32(v) => Ok(v.clone()),
            TensorData::Float16(v) => Ok(v.iter().map(|h| h.to_f32()).collect()),
            TensorData::Uint8(_) => Err(self.dtype_error("float32 or float16")),
        }
    }

    /// Little-endian encoding of the buffer
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Float16(v) => v.iter().flat_map(|x| x.to_bits().to_le_bytes()).collect(),
            TensorData::Uint8(v) => v.clone(),
        }
    }

    /// Decode a tensor previously written with [`Tensor::to_le_bytes`]
    pub fn from_le_bytes(
        name: impl Into<String>,
        shape: Vec<usize>,
        role: TensorRole,
        dtype: DType,
        bytes: &[u8],
    ) -> Result<Self> {
        let name = name.into();
        let width = dtype.byte_width();
        if bytes.len() % width != 0 {
            return Err(QuantError::InvalidTensorData {
                tensor: name,
                reason: format!("{} bytes is not a multiple of the {} width", bytes.len(), dtype),
            });
        }

        let data = match dtype {
            DType::Float32 => TensorData::Float32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::Float16 => TensorData::Float16(
                bytes
                    .chunks_exact(2)
                    .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])))
                    .collect(),
            ),
            DType::Uint8 => TensorData::Uint8(bytes.to_vec()),
        };

        Self::new(name, shape, role, data)
    }

    pub(crate) fn dtype_error(&self, expected: &str) -> QuantError {
        QuantError::UnexpectedDType {
            tensor: self.name.clone(),
            expected: expected.to_string(),
            actual: self.dtype(),
        }
    }
}

/// Named tensors in insertion order.
///
/// Order is preserved so that exports of the same store are byte-identical.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorStore {
    tensors: Vec<Tensor>,
    index: HashMap<String, usize>,
}

impl TensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from tensors, rejecting duplicate names
    pub fn from_tensors(tensors: impl IntoIterator<Item = Tensor>) -> Result<Self> {
        let mut store = Self::new();
        for tensor in tensors {
            store.insert(tensor)?;
        }
        Ok(store)
    }

    /// Append a tensor; names must be unique
    pub fn insert(&mut self, tensor: Tensor) -> Result<()> {
        if self.index.contains_key(tensor.name()) {
            return Err(QuantError::DuplicateTensor(tensor.name().to_string()));
        }

        self.index.insert(tensor.name().to_string(), self.tensors.len());
        self.tensors.push(tensor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.tensors[i])
    }

    /// Like [`TensorStore::get`] but missing tensors are an error
    pub fn require(&self, name: &str) -> Result<&Tensor> {
        self.get(name)
            .ok_or_else(|| QuantError::UnknownTensor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.tensors.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(|t| t.name())
    }

    /// Sum of every tensor's storage footprint
    pub fn total_bytes(&self) -> usize {
        self.tensors.iter().map(Tensor::byte_size).sum()
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.tensors
    }
}

impl IntoIterator for TensorStore {
    type Item = Tensor;
    type IntoIter = std::vec::IntoIter<Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

impl<'a> IntoIterator for &'a TensorStore {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight(name: &str, values: Vec<f32>) -> Tensor {
        let len = values.len();
        Tensor::from_f32(name, vec![len], TensorRole::Weight, values).unwrap()
    }

    #[test]
    fn test_shape_must_match_buffer() {
        let err = Tensor::from_f32("w", vec![2, 3], TensorRole::Weight, vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, QuantError::ShapeMismatch { expected: 6, actual: 5, .. }));
    }

    #[test]
    fn test_byte_size_follows_dtype() {
        let t = Tensor::from_f32("w", vec![2, 2], TensorRole::Weight, vec![1.0; 4]).unwrap();
        assert_eq!(t.byte_size(), 16);

        let q = t.with_data(TensorData::Uint8(vec![0; 4])).unwrap();
        assert_eq!(q.byte_size(), 4);

        let h = t.with_data(TensorData::Float16(vec![f16::ZERO; 4])).unwrap();
        assert_eq!(h.byte_size(), 8);
    }

    #[test]
    fn test_le_bytes_decode() {
        let t = Tensor::from_f32("w", vec![3], TensorRole::Bias, vec![1.5, -2.25, 0.0]).unwrap();
        let bytes = t.to_le_bytes();
        assert_eq!(bytes.len(), 12);

        let decoded =
            Tensor::from_le_bytes("w", vec![3], TensorRole::Bias, DType::Float32, &bytes).unwrap();
        assert_eq!(decoded, t);

        let short = Tensor::from_le_bytes("w", vec![3], TensorRole::Bias, DType::Float32, &bytes[..8]);
        assert!(short.is_err());
    }

    #[test]
    fn test_store_preserves_insertion_order() {
        let store = TensorStore::from_tensors(vec![
            weight("z.weight", vec![1.0]),
            weight("a.weight", vec![2.0]),
            weight("m.weight", vec![3.0]),
        ])
        .unwrap();

        let names: Vec<&str> = store.names().collect();
        assert_eq!(names, vec!["z.weight", "a.weight", "m.weight"]);
        assert_eq!(store.total_bytes(), 12);
    }

    #[test]
    fn test_store_rejects_duplicates() {
        let mut store = TensorStore::new();
        store.insert(weight("w", vec![1.0])).unwrap();
        let err = store.insert(weight("w", vec![2.0])).unwrap_err();
        assert_eq!(err, QuantError::DuplicateTensor("w".to_string()));
        assert!(store.require("missing").is_err());
    }
}
