//! Tensor store, label schema and affine weight quantization
//!
//! This crate holds the in-memory side of model conversion: a named,
//! insertion-ordered collection of parameter tensors, the label schema that
//! travels with them, and the two precision-reduction strategies (8-bit
//! affine quantization and half-precision casting) applied before export.

pub mod conversion;
pub mod labels;
pub mod precision;
pub mod quantization;
pub mod tensor;

// Re-export main types
pub use conversion::{convert_store, ConversionMode, ConvertedStore, SizeReport};
pub use labels::LabelSchema;
pub use precision::{cast_precision, cast_store};
pub use quantization::{
    QuantizationParams, QuantizationPolicy, QuantizationTable, Quantizer, RolePolicy,
};
pub use tensor::{DType, Tensor, TensorData, TensorRole, TensorStore};

/// Error types for tensor handling and quantization
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QuantError {
    #[error("invalid data in tensor '{tensor}': {reason}")]
    InvalidTensorData { tensor: String, reason: String },

    #[error("tensor '{tensor}' has shape {shape:?} ({expected} elements) but {actual} were supplied")]
    ShapeMismatch {
        tensor: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("tensor '{tensor}' has dtype {actual}, expected {expected}")]
    UnexpectedDType {
        tensor: String,
        expected: String,
        actual: DType,
    },

    #[error("duplicate tensor name '{0}'")]
    DuplicateTensor(String),

    #[error("unknown tensor '{0}'")]
    UnknownTensor(String),

    #[error("invalid label schema: {0}")]
    InvalidLabelSchema(String),

    #[error("unsupported conversion mode '{0}' (expected int8, fp16 or full)")]
    UnsupportedMode(String),
}

pub type Result<T> = std::result::Result<T, QuantError>;
