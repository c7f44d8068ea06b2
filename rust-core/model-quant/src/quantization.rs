//! Affine min-max quantization of float tensors to 8-bit unsigned integers
//!
//! Every selected tensor gets one `scale` and `zero_point` (flat per-tensor
//! granularity). A value `x` maps to `q = clamp(round(x / scale + zero_point), 0, 255)`
//! and back to `(q - zero_point) * scale`, so any value inside the tensor's
//! original range is restored to within `scale / 2`.

use crate::tensor::{DType, Tensor, TensorData, TensorRole, TensorStore};
use crate::{QuantError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of quantization steps between the minimum and maximum value
pub const QUANT_STEPS: f64 = 255.0;

/// Span substituted when a tensor's minimum equals its maximum
pub const MIN_RANGE: f64 = 1e-8;

/// Per-tensor affine quantization parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub scale: f64,
    pub zero_point: f64,
    #[serde(default = "quantized_dtype")]
    pub dtype: DType,
}

fn quantized_dtype() -> DType {
    DType::Uint8
}

/// Quantization parameters keyed by tensor name
pub type QuantizationTable = BTreeMap<String, QuantizationParams>;

impl QuantizationParams {
    /// Parameters covering `[lo, hi]`; a degenerate range is widened by [`MIN_RANGE`]
    pub fn from_range(lo: f64, hi: f64) -> Self {
        let span = (hi - lo).max(MIN_RANGE);
        let scale = span / QUANT_STEPS;
        Self {
            scale,
            zero_point: -lo / scale,
            dtype: DType::Uint8,
        }
    }

    #[inline]
    pub fn quantize_value(&self, x: f64) -> u8 {
        (x / self.scale + self.zero_point).round().clamp(0.0, QUANT_STEPS) as u8
    }

    #[inline]
    pub fn dequantize_value(&self, q: u8) -> f64 {
        (q as f64 - self.zero_point) * self.scale
    }

    /// Worst-case absolute reconstruction error for in-range values
    pub fn max_error(&self) -> f64 {
        self.scale / 2.0
    }
}

/// Decides which tensors of a store are quantized
pub trait QuantizationPolicy: Send + Sync {
    fn should_quantize(&self, tensor: &Tensor) -> bool;
}

impl<F> QuantizationPolicy for F
where
    F: Fn(&Tensor) -> bool + Send + Sync,
{
    fn should_quantize(&self, tensor: &Tensor) -> bool {
        self(tensor)
    }
}

/// Selects float32 tensors by their role tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    roles: Vec<TensorRole>,
}

impl RolePolicy {
    /// Only dense weight matrices; biases, norms and embeddings pass through
    pub fn weights_only() -> Self {
        Self {
            roles: vec![TensorRole::Weight],
        }
    }

    pub fn with_roles(roles: impl IntoIterator<Item = TensorRole>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    pub fn including(mut self, role: TensorRole) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn roles(&self) -> &[TensorRole] {
        &self.roles
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::weights_only()
    }
}

impl QuantizationPolicy for RolePolicy {
    fn should_quantize(&self, tensor: &Tensor) -> bool {
        tensor.dtype() == DType::Float32 && self.roles.contains(&tensor.role())
    }
}

/// Affine 8-bit quantizer
#[derive(Debug, Clone, Copy)]
pub struct Quantizer {
    parallel: bool,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Quantizer {
    /// Quantizer that processes a store's tensors in parallel
    pub fn new() -> Self {
        Self { parallel: true }
    }

    /// Quantizer that processes tensors one after another
    pub fn sequential() -> Self {
        Self { parallel: false }
    }

    /// Compute scale and zero point from the tensor's min and max.
    ///
    /// Fails with `InvalidTensorData` on NaN or infinite elements.
    pub fn compute_params(&self, tensor: &Tensor) -> Result<QuantizationParams> {
        let values = float_values(tensor)?;
        if values.is_empty() {
            return Ok(QuantizationParams::from_range(0.0, 0.0));
        }

        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (i, &x) in values.iter().enumerate() {
            if !x.is_finite() {
                return Err(non_finite(tensor, i, x));
            }
            lo = lo.min(x);
            hi = hi.max(x);
        }

        Ok(QuantizationParams::from_range(lo, hi))
    }

    /// Quantize to uint8 with the same shape
    pub fn quantize(&self, tensor: &Tensor, params: &QuantizationParams) -> Result<Tensor> {
        let values = float_values(tensor)?;
        let mut quantized = Vec::with_capacity(values.len());
        for (i, &x) in values.iter().enumerate() {
            if !x.is_finite() {
                return Err(non_finite(tensor, i, x));
            }
            quantized.push(params.quantize_value(x));
        }

        tensor.with_data(TensorData::Uint8(quantized))
    }

    /// Restore a uint8 tensor to float32 with the same shape
    pub fn dequantize(&self, tensor: &Tensor, params: &QuantizationParams) -> Result<Tensor> {
        let TensorData::Uint8(values) = tensor.data() else {
            return Err(tensor.dtype_error("uint8"));
        };

        let restored = values
            .iter()
            .map(|&q| params.dequantize_value(q) as f32)
            .collect();

        tensor.with_data(TensorData::Float32(restored))
    }

    /// Quantize every tensor the policy selects, passing the rest through.
    ///
    /// Empty tensors are left untouched and get no parameters. Store order is kept.
    pub fn quantize_store(
        &self,
        store: TensorStore,
        policy: &dyn QuantizationPolicy,
    ) -> Result<(TensorStore, QuantizationTable)> {
        let convert = |tensor: Tensor| -> Result<(Tensor, Option<QuantizationParams>)> {
            if tensor.is_empty() || !policy.should_quantize(&tensor) {
                tracing::debug!(tensor = tensor.name(), dtype = %tensor.dtype(), "passing through");
                return Ok((tensor, None));
            }

            let params = self.compute_params(&tensor)?;
            let quantized = self.quantize(&tensor, &params)?;
            tracing::debug!(
                tensor = tensor.name(),
                scale = params.scale,
                zero_point = params.zero_point,
                "quantized"
            );
            Ok((quantized, Some(params)))
        };

        let tensors = store.into_tensors();
        let converted: Vec<(Tensor, Option<QuantizationParams>)> = if self.parallel {
            tensors.into_par_iter().map(convert).collect::<Result<_>>()?
        } else {
            tensors.into_iter().map(convert).collect::<Result<_>>()?
        };

        let mut table = QuantizationTable::new();
        let mut out = TensorStore::new();
        for (tensor, params) in converted {
            if let Some(params) = params {
                table.insert(tensor.name().to_string(), params);
            }
            out.insert(tensor)?;
        }

        Ok((out, table))
    }
}

/// Float elements widened to f64
fn float_values(tensor: &Tensor) -> Result<Vec<f64>> {
    match tensor.data() {
        TensorData::Float32(v) => Ok(v.iter().map(|&x| x as f64).collect()),
        TensorData::Float16(v) => Ok(v.iter().map(|x| x.to_f64()).collect()),
        TensorData::Uint8(_) => Err(tensor.dtype_error("float32 or float16")),
    }
}

fn non_finite(tensor: &Tensor, index: usize, value: f64) -> QuantError {
    QuantError::InvalidTensorData {
        tensor: tensor.name().to_string(),
        reason: format!("non-finite value {} at element {}", value, index),
    }
}
