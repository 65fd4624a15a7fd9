// Flatten — Collapse trailing dimensions into one
//
// By default, flattens all dimensions except the batch dimension:
//   [N, C, H, W] → [N, C*H*W]
//
// The result shares storage with the input.

use mosaic_core::backend::Backend;
use mosaic_core::error::Result;
use mosaic_core::shape::Shape;
use mosaic_core::tensor::Tensor;

use crate::layer::Layer;

/// Flatten layer: collapses dimensions `[start_dim..]` into one.
///
/// # Examples
/// ```ignore
/// let flatten = Flatten::new(1);
/// let y = flatten.forward(&x)?; // [2, 8, 4, 4] → [2, 128]
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Flatten {
    start_dim: usize,
}

impl Flatten {
    /// Create a Flatten that collapses from `start_dim` through the last dim.
    pub fn new(start_dim: usize) -> Self {
        Flatten { start_dim }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<B: Backend> Layer<B> for Flatten {
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        let dims = x.dims();
        if self.start_dim >= dims.len() {
            return Ok(x.clone());
        }
        let mut new_dims: Vec<usize> = dims[..self.start_dim].to_vec();
        new_dims.push(dims[self.start_dim..].iter().product());
        x.reshape(Shape::new(new_dims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::DType;
    use mosaic_cpu::{CpuBackend, CpuDevice, CpuTensor};

    #[test]
    fn test_flatten_dims() -> Result<()> {
        let x = CpuTensor::zeros((2, 8, 4, 4), DType::F32, &CpuDevice)?;
        let y = Layer::<CpuBackend>::forward(&Flatten::default(), &x)?;
        assert_eq!(y.dims(), &[2, 128]);
        assert!(y.shares_storage(&x));

        let all = Layer::<CpuBackend>::forward(&Flatten::new(0), &x)?;
        assert_eq!(all.dims(), &[256]);
        let none = Layer::<CpuBackend>::forward(&Flatten::new(4), &x)?;
        assert_eq!(none.dims(), x.dims());
        Ok(())
    }
}
