//! Half-precision casting, the lower-fidelity alternative to integer quantization

use crate::tensor::{Tensor, TensorData, TensorStore};
use crate::{QuantError, Result};
use half::f16;

/// Cast a float32 tensor to float16.
///
/// Values beyond the float16 range saturate to its largest finite magnitude;
/// NaN is rejected. Float16 input is returned unchanged.
pub fn cast_precision(tensor: &Tensor) -> Result<Tensor> {
    match tensor.data() {
        TensorData::Float32(values) => {
            let limit = f16::MAX.to_f32();
            let mut halved = Vec::with_capacity(values.len());
            for (i, &x) in values.iter().enumerate() {
                if x.is_nan() {
                    return Err(QuantError::InvalidTensorData {
                        tensor: tensor.name().to_string(),
                        reason: format!("NaN at element {}", i),
                    });
                }
                halved.push(f16::from_f32(x.clamp(-limit, limit)));
            }
            tensor.with_data(TensorData::Float16(halved))
        }
        TensorData::Float16(_) => Ok(tensor.clone()),
        TensorData::Uint8(_) => Err(tensor.dtype_error("float32")),
    }
}

/// Cast every float32 tensor of a store; other dtypes pass through
pub fn cast_store(store: TensorStore) -> Result<TensorStore> {
    let mut out = TensorStore::new();
    for tensor in store {
        let tensor = match tensor.data() {
            TensorData::Float32(_) => cast_precision(&tensor)?,
            _ => tensor,
        };
        out.insert(tensor)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, TensorRole};

    #[test]
    fn test_cast_keeps_shape_and_halves_size() {
        let t = Tensor::from_f32("w", vec![2, 2], TensorRole::Weight, vec![0.5, -1.25, 3.0, 0.1])
            .unwrap();
        let h = cast_precision(&t).unwrap();
        assert_eq!(h.dtype(), DType::Float16);
        assert_eq!(h.shape(), &[2, 2]);
        assert_eq!(h.byte_size() * 2, t.byte_size());

        let restored = h.to_f32_vec().unwrap();
        assert_eq!(&restored[..3], &[0.5, -1.25, 3.0]);
        assert!((restored[3] - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_cast_saturates_out_of_range() {
        let t = Tensor::from_f32(
            "w",
            vec![3],
            TensorRole::Weight,
            vec![1e6, -1e6, f32::INFINITY],
        )
        .unwrap();
        let restored = cast_precision(&t).unwrap().to_f32_vec().unwrap();
        assert_eq!(restored, vec![65504.0, -65504.0, 65504.0]);
    }

    #[test]
    fn test_cast_rejects_nan() {
        let t = Tensor::from_f32("w", vec![1], TensorRole::Weight, vec![f32::NAN]).unwrap();
        assert!(cast_precision(&t).is_err());
    }

    #[test]
    fn test_cast_store_touches_only_float32() {
        let store = TensorStore::from_tensors(vec![
            Tensor::from_f32("a", vec![1], TensorRole::Bias, vec![1.0]).unwrap(),
            Tensor::new("b", vec![1], TensorRole::Weight, TensorData::Uint8(vec![7])).unwrap(),
        ])
        .unwrap();
        let out = cast_store(store).unwrap();
        assert_eq!(out.get("a").unwrap().dtype(), DType::Float16);
        assert_eq!(out.get("b").unwrap().dtype(), DType::Uint8);
    }
}
