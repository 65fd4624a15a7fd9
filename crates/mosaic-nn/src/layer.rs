// Layer trait — Plain tensor-to-tensor computation units
//
// Layers are the building blocks that know nothing about declared shapes,
// children or persistence: Linear, BatchNorm, Dropout, activations. They
// map one tensor to one tensor and expose their parameters and buffers.
//
// A Layer becomes a full Module by wrapping it (see wrapper.rs), which adds
// declared shape metadata and shape inference on top without changing what
// the layer computes.

use mosaic_core::backend::Backend;
use mosaic_core::error::Result;
use mosaic_core::tensor::Tensor;

/// A single-input, single-output computation unit.
pub trait Layer<B: Backend> {
    /// Compute the output tensor from the input tensor.
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>>;

    /// Parameters with their local names ("weight", "bias", ...).
    fn named_parameters(&self) -> Vec<(String, Tensor<B>)> {
        Vec::new()
    }

    /// Buffers with their local names ("running_mean", ...).
    fn named_buffers(&self) -> Vec<(String, Tensor<B>)> {
        Vec::new()
    }

    /// Set training or evaluation mode. Default is a no-op.
    fn set_training(&self, _training: bool) {}

    /// Whether the layer is in training mode (default: true).
    fn is_training(&self) -> bool {
        true
    }

    /// Re-initialize parameters in place. Default is a no-op.
    fn reset_parameters(&self) -> Result<()> {
        Ok(())
    }
}
