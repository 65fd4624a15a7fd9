// BatchNorm — Batch Normalization over the channel dimension
//
// Normalizes activations ACROSS the batch for each channel:
//
//   x_hat = (x - mean_batch) / sqrt(var_batch + ε)
//   y = γ * x_hat + β
//
// The input is [N, C, ...]; mean and variance are taken per channel over
// the batch and every trailing dimension. [N, C] and [N, C, L] and
// [N, C, H, W] are all accepted.
//
// RUNNING STATISTICS:
//   In training mode, exponential moving averages are kept:
//     running_mean = (1 - momentum) * running_mean + momentum * mean_batch
//     running_var  = (1 - momentum) * running_var  + momentum * var_batch
//   and num_batches_tracked is incremented. In eval mode the running
//   statistics are used instead of batch statistics and nothing changes.
//
//   The statistics are buffers: tensors that are part of the persisted state
//   but never trainable. They are updated in place, so any handle obtained
//   from `named_buffers` sees the new values.
//
// SHAPES:
//   Input:  [N, C, ...]
//   Output: same shape
//   γ, β, running_mean, running_var: [C]
//   num_batches_tracked: scalar (I64)

use std::cell::Cell;

use mosaic_core::backend::Backend;
use mosaic_core::bail;
use mosaic_core::dtype::DType;
use mosaic_core::error::Result;
use mosaic_core::shape::Shape;
use mosaic_core::tensor::Tensor;

use crate::layer::Layer;

/// Batch Normalization layer over dimension 1 of the input.
///
/// # Examples
/// ```ignore
/// let bn = BatchNorm::<CpuBackend>::new(16, 1e-5, 0.1, DType::F32, &dev)?;
/// let y = bn.forward(&x)?; // x: [batch, 16, ...], same shape out
/// ```
pub struct BatchNorm<B: Backend> {
    /// Learnable scale (gamma): [C]
    weight: Tensor<B>,
    /// Learnable shift (beta): [C]
    bias: Tensor<B>,
    running_mean: Tensor<B>,
    running_var: Tensor<B>,
    num_batches_tracked: Tensor<B>,
    num_features: usize,
    eps: f64,
    momentum: f64,
    training: Cell<bool>,
}

impl<B: Backend> BatchNorm<B> {
    /// Create a new BatchNorm layer.
    ///
    /// # Arguments
    /// - `num_features`: number of channels (C)
    /// - `eps`: numerical stability constant (typically 1e-5)
    /// - `momentum`: EMA momentum for running stats (typically 0.1)
    /// - `dtype`: data type for parameters and running statistics
    /// - `device`: device
    pub fn new(
        num_features: usize,
        eps: f64,
        momentum: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        Ok(BatchNorm {
            weight: Tensor::<B>::ones(num_features, dtype, device)?.set_variable(),
            bias: Tensor::<B>::zeros(num_features, dtype, device)?.set_variable(),
            running_mean: Tensor::<B>::zeros(num_features, dtype, device)?,
            running_var: Tensor::<B>::ones(num_features, dtype, device)?,
            num_batches_tracked: Tensor::<B>::zeros((), DType::I64, device)?,
            num_features,
            eps,
            momentum,
            training: Cell::new(true),
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn weight(&self) -> &Tensor<B> {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor<B> {
        &self.bias
    }

    pub fn running_mean(&self) -> &Tensor<B> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor<B> {
        &self.running_var
    }

    /// Number of training batches folded into the running statistics.
    pub fn num_batches_tracked(&self) -> Result<u64> {
        Ok(self.num_batches_tracked.to_scalar_f64()? as u64)
    }

    /// Fold one batch's statistics into the running averages.
    fn update_running_stats(&self, mean: &Tensor<B>, var: &Tensor<B>) -> Result<()> {
        let m = self.momentum;
        let blend = |running: &Tensor<B>, batch: &Tensor<B>| -> Result<()> {
            let old = running.to_f64_vec()?;
            let new = batch.to_f64_vec()?;
            let mixed: Vec<f64> = old
                .iter()
                .zip(&new)
                .map(|(r, b)| (1.0 - m) * r + m * b)
                .collect();
            running.update_data_inplace(&mixed)
        };
        blend(&self.running_mean, mean)?;
        blend(&self.running_var, var)?;
        let tracked = self.num_batches_tracked.to_scalar_f64()?;
        self.num_batches_tracked.update_data_inplace(&[tracked + 1.0])
    }
}

impl<B: Backend> Layer<B> for BatchNorm<B> {
    /// Training:  use batch mean/var, update running stats.
    /// Eval:      use running mean/var.
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        if x.rank() < 2 {
            bail!(
                "BatchNorm: expected input [N, C, ...], got rank {}",
                x.rank()
            );
        }
        let dims = x.dims();
        let (n, c) = (dims[0], dims[1]);
        if c != self.num_features {
            bail!(
                "BatchNorm: expected {} channels, got {}",
                self.num_features, c
            );
        }
        let rest: usize = dims[2..].iter().product();
        let x3 = x.reshape((n, c, rest))?;
        let per_channel = Shape::new(vec![1, c, 1]);

        let (mean, var) = if self.training.get() {
            // [N, C, R] → [N, C] → [C]
            let mean = x3.mean(2, false)?.mean(0, false)?;
            let diff = x3.sub(&mean.reshape(per_channel.clone())?)?;
            let var = diff.square()?.mean(2, false)?.mean(0, false)?;
            self.update_running_stats(&mean, &var)?;
            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let invstd = var.affine(1.0, self.eps)?.sqrt()?;
        let x_hat = x3
            .sub(&mean.reshape(per_channel.clone())?)?
            .div(&invstd.reshape(per_channel.clone())?)?;
        let y = x_hat
            .mul(&self.weight.reshape(per_channel.clone())?)?
            .add(&self.bias.reshape(per_channel)?)?;
        y.reshape(x.shape().clone())
    }

    fn named_parameters(&self) -> Vec<(String, Tensor<B>)> {
        vec![
            ("weight".to_string(), self.weight.clone()),
            ("bias".to_string(), self.bias.clone()),
        ]
    }

    fn named_buffers(&self) -> Vec<(String, Tensor<B>)> {
        vec![
            ("running_mean".to_string(), self.running_mean.clone()),
            ("running_var".to_string(), self.running_var.clone()),
            (
                "num_batches_tracked".to_string(),
                self.num_batches_tracked.clone(),
            ),
        ]
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
    }

    fn is_training(&self) -> bool {
        self.training.get()
    }

    /// γ = 1, β = 0, running statistics back to mean 0 / var 1.
    fn reset_parameters(&self) -> Result<()> {
        let c = self.num_features;
        self.weight.update_data_inplace(&vec![1.0; c])?;
        self.bias.update_data_inplace(&vec![0.0; c])?;
        self.running_mean.update_data_inplace(&vec![0.0; c])?;
        self.running_var.update_data_inplace(&vec![1.0; c])?;
        self.num_batches_tracked.update_data_inplace(&[0.0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_cpu::{CpuBackend, CpuDevice, CpuTensor};

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[test]
    fn test_training_normalizes_and_tracks() -> Result<()> {
        let dev = CpuDevice;
        let bn = BatchNorm::<CpuBackend>::new(2, 0.0, 0.5, DType::F64, &dev)?;
        // channel 0: {1, 3}, channel 1: {10, 10}
        let x = CpuTensor::from_f64_slice(&[1.0, 10.0, 3.0, 10.0], (2, 2), DType::F64, &dev)?;
        let y = bn.forward(&x)?;
        assert_eq!(y.dims(), &[2, 2]);
        let y = y.to_f64_vec()?;
        assert!((y[0] + 1.0).abs() < 1e-9 && (y[2] - 1.0).abs() < 1e-9);

        // mean = [2, 10], var = [1, 0], momentum 0.5
        assert!(close(&bn.running_mean().to_f64_vec()?, &[1.0, 5.0]));
        assert!(close(&bn.running_var().to_f64_vec()?, &[1.0, 0.5]));
        assert_eq!(bn.num_batches_tracked()?, 1);
        Ok(())
    }

    #[test]
    fn test_eval_uses_running_stats() -> Result<()> {
        let dev = CpuDevice;
        let bn = BatchNorm::<CpuBackend>::new(3, 1e-5, 0.1, DType::F32, &dev)?;
        bn.set_training(false);
        let x = CpuTensor::rand((4, 3, 5), DType::F32, &dev)?;
        let y = bn.forward(&x)?;
        // running mean 0 / var 1: output ≈ input
        let scale = 1.0 / (1.0f64 + 1e-5).sqrt();
        let expected: Vec<f64> = x.to_f64_vec()?.iter().map(|v| v * scale).collect();
        assert!(y
            .to_f64_vec()?
            .iter()
            .zip(&expected)
            .all(|(a, b)| (a - b).abs() < 1e-5));
        assert_eq!(bn.num_batches_tracked()?, 0);
        Ok(())
    }

    #[test]
    fn test_buffers_and_reset() -> Result<()> {
        let dev = CpuDevice;
        let bn = BatchNorm::<CpuBackend>::new(2, 1e-5, 0.1, DType::F32, &dev)?;
        let names: Vec<String> = bn.named_buffers().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["running_mean", "running_var", "num_batches_tracked"]);
        assert!(bn.named_buffers().iter().all(|(_, t)| !t.is_variable()));

        bn.forward(&CpuTensor::rand((8, 2), DType::F32, &dev)?)?;
        bn.reset_parameters()?;
        assert_eq!(bn.running_mean().to_f64_vec()?, vec![0.0, 0.0]);
        assert_eq!(bn.num_batches_tracked()?, 0);
        assert!(bn.forward(&CpuTensor::rand((8, 3), DType::F32, &dev)?).is_err());
        Ok(())
    }
}
