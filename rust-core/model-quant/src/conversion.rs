//! Store-level conversion: one precision-reduction strategy per run

use crate::precision::cast_store;
use crate::quantization::{QuantizationPolicy, QuantizationTable, Quantizer};
use crate::tensor::TensorStore;
use crate::{QuantError, Result};
use std::fmt;
use std::str::FromStr;

/// Precision strategy applied to a whole store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionMode {
    /// 8-bit affine quantization of policy-selected tensors
    #[default]
    Int8Affine,
    /// float32 to float16 for every float tensor
    HalfPrecision,
    /// No precision change
    FullPrecision,
}

impl ConversionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversionMode::Int8Affine => "int8",
            ConversionMode::HalfPrecision => "fp16",
            ConversionMode::FullPrecision => "full",
        }
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionMode {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "int8" | "uint8" | "quantized" => Ok(ConversionMode::Int8Affine),
            "fp16" | "half" | "float16" => Ok(ConversionMode::HalfPrecision),
            "full" | "fp32" | "float32" => Ok(ConversionMode::FullPrecision),
            other => Err(QuantError::UnsupportedMode(other.to_string())),
        }
    }
}

/// Size before and after conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    pub original_bytes: usize,
    pub converted_bytes: usize,
}

impl SizeReport {
    pub fn reduction_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (self.original_bytes as f64 - self.converted_bytes as f64) / self.original_bytes as f64
            * 100.0
    }

    pub fn original_mb(&self) -> f64 {
        self.original_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn converted_mb(&self) -> f64 {
        self.converted_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Result of converting a store
#[derive(Debug, Clone)]
pub struct ConvertedStore {
    pub store: TensorStore,
    /// Empty unless the mode is `Int8Affine`
    pub quantization: QuantizationTable,
    pub mode: ConversionMode,
    pub report: SizeReport,
}

/// Apply `mode` to `store`; the policy only matters for `Int8Affine`
pub fn convert_store(
    store: TensorStore,
    mode: ConversionMode,
    policy: &dyn QuantizationPolicy,
    quantizer: &Quantizer,
) -> Result<ConvertedStore> {
    let original_bytes = store.total_bytes();

    let (store, quantization) = match mode {
        ConversionMode::Int8Affine => quantizer.quantize_store(store, policy)?,
        ConversionMode::HalfPrecision => (cast_store(store)?, QuantizationTable::new()),
        ConversionMode::FullPrecision => (store, QuantizationTable::new()),
    };

    let report = SizeReport {
        original_bytes,
        converted_bytes: store.total_bytes(),
    };

    tracing::info!(
        mode = %mode,
        quantized = quantization.len(),
        "Model size: {:.2} MB -> {:.2} MB ({:.1}% reduction)",
        report.original_mb(),
        report.converted_mb(),
        report.reduction_percent()
    );

    Ok(ConvertedStore {
        store,
        quantization,
        mode,
        report,
    })
}
