// Activation layers — tensor activations as Layers
//
// Thin wrappers turning tensor-level activations (tensor.relu(), ...) into
// Layer implementations, so they can be wrapped and chained:
//
//   let model = Sequential::new()
//       .add(wrap(linear1, &dev))
//       .add(wrap(ReLU, &dev))
//       .add(wrap(linear2, &dev));

use mosaic_core::backend::Backend;
use mosaic_core::error::Result;
use mosaic_core::tensor::Tensor;

use crate::layer::Layer;

/// ReLU activation: max(0, x)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl<B: Backend> Layer<B> for ReLU {
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        x.relu()
    }
}

/// Sigmoid activation: 1 / (1 + e^(-x))
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl<B: Backend> Layer<B> for Sigmoid {
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        x.sigmoid()
    }
}

/// Tanh activation
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl<B: Backend> Layer<B> for Tanh {
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        x.tanh()
    }
}
