//! Conversions between host arrays and tensors

use ndarray::{Array, Array3, Dimension};
use tch::{Device, Kind, Tensor};

use crate::error::{DagcnError, Result};

/// Copy an `f32` array onto `device`, keeping its shape
pub fn to_tensor<D: Dimension>(array: &Array<f32, D>, device: Device) -> Result<Tensor> {
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let standard = array.as_standard_layout();
    let values = standard
        .as_slice()
        .ok_or_else(|| DagcnError::Dataset("array is not contiguous".into()))?;
    Ok(Tensor::from_slice(values)
        .reshape(shape.as_slice())
        .to_device(device))
}

/// Copy a rank-3 tensor back to the host as `f32`
pub fn to_array3(tensor: &Tensor) -> Result<Array3<f32>> {
    let size = tensor.size();
    if size.len() != 3 {
        return Err(DagcnError::shape("to_array3", "rank-3 tensor", size));
    }
    let values = Vec::<f32>::try_from(
        tensor
            .detach()
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .flatten(0, -1),
    )?;
    Array3::from_shape_vec(
        (size[0] as usize, size[1] as usize, size[2] as usize),
        values,
    )
    .map_err(|e| DagcnError::Dataset(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_tensor_roundtrip_keeps_layout() {
        let a = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 12 + j * 4 + k) as f32);
        let t = to_tensor(&a, Device::Cpu).unwrap();
        assert_eq!(t.size(), vec![2, 3, 4]);
        assert_eq!(t.double_value(&[1, 2, 3]), 23.0);
        assert_eq!(to_array3(&t).unwrap(), a);
    }

    #[test]
    fn test_permuted_array_is_made_contiguous() {
        let a = Array4::from_shape_fn((2, 1, 3, 2), |(s, _, n, t)| (s * 6 + n * 2 + t) as f32);
        let permuted = a.clone().permuted_axes([0, 1, 3, 2]);
        let t = to_tensor(&permuted, Device::Cpu).unwrap();
        assert_eq!(t.size(), vec![2, 1, 2, 3]);
        assert_eq!(t.double_value(&[1, 0, 1, 2]), a[[1, 0, 2, 1]] as f64);
    }

    #[test]
    fn test_to_array3_rejects_wrong_rank() {
        let t = Tensor::zeros([2, 2], (Kind::Float, Device::Cpu));
        assert!(to_array3(&t).is_err());
    }
}
