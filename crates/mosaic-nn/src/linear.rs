// Linear — Fully-connected (dense) layer
//
// y = xW^T + b
//
// Linear(in_features, out_features) transforms an input of shape
// [..., in_features] to [..., out_features].
//
// WEIGHT INITIALIZATION:
//
// Weights and bias are drawn from U(-k, k) with k = sqrt(1/in_features).
// `reset_parameters` redraws them in place, so every handle to the
// parameters (and every module sharing this layer) sees the new values.
//
// PARAMETER SHAPES:
//
//   weight: [out_features, in_features]
//   bias:   [out_features]               — broadcast over leading dims

use mosaic_core::backend::Backend;
use mosaic_core::bail;
use mosaic_core::dtype::DType;
use mosaic_core::error::Result;
use mosaic_core::tensor::Tensor;

use crate::init;
use crate::layer::Layer;

/// A fully-connected (dense) layer: y = xW^T + b.
///
/// # Examples
/// ```ignore
/// let linear = Linear::<CpuBackend>::new(784, 128, true, DType::F32, &dev)?;
/// let x = CpuTensor::rand((32, 784), DType::F32, &dev)?;
/// let y = linear.forward(&x)?; // shape: [32, 128]
/// ```
pub struct Linear<B: Backend> {
    /// Weight matrix: [out_features, in_features]
    weight: Tensor<B>,
    /// Optional bias vector: [out_features]
    bias: Option<Tensor<B>>,
    in_features: usize,
    out_features: usize,
}

impl<B: Backend> Linear<B> {
    /// Create a new Linear layer with uniform U(-k, k) initialization.
    ///
    /// # Arguments
    /// - `in_features`: size of each input sample
    /// - `out_features`: size of each output sample
    /// - `use_bias`: whether to add a learnable bias
    /// - `dtype`: data type for parameters
    /// - `device`: device to create parameters on
    pub fn new(
        in_features: usize,
        out_features: usize,
        use_bias: bool,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let k = Self::bound(in_features);
        let weight = init::uniform::<B>((out_features, in_features), -k, k, dtype, device)?;
        let bias = if use_bias {
            Some(init::uniform::<B>(out_features, -k, k, dtype, device)?)
        } else {
            None
        };
        Ok(Linear {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Create a Linear layer from existing weight and bias tensors.
    pub fn from_tensors(weight: Tensor<B>, bias: Option<Tensor<B>>) -> Result<Self> {
        let dims = weight.dims();
        if dims.len() != 2 {
            bail!(
                "Linear weight must be 2D, got shape {:?}",
                dims
            );
        }
        let (out_features, in_features) = (dims[0], dims[1]);
        if let Some(b) = &bias {
            if b.elem_count() != out_features {
                bail!(
                    "Linear bias must have {} elements, got shape {}",
                    out_features,
                    b.shape()
                );
            }
        }
        Ok(Linear {
            weight: weight.set_variable(),
            bias: bias.map(|b| b.set_variable()),
            in_features,
            out_features,
        })
    }

    fn bound(in_features: usize) -> f64 {
        (1.0 / in_features.max(1) as f64).sqrt()
    }

    /// The input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// The output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor<B> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor<B>> {
        self.bias.as_ref()
    }
}

impl<B: Backend> Layer<B> for Linear<B> {
    /// Forward pass: y = x @ W^T + b
    ///
    /// Input shape:  [..., in_features]
    /// Output shape: [..., out_features]
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        let last = x.dims().last().copied().unwrap_or(0);
        if last != self.in_features {
            bail!(
                "Linear expects {} input features, got shape {}",
                self.in_features,
                x.shape()
            );
        }
        let output = x.matmul(&self.weight.t()?)?;
        match &self.bias {
            Some(bias) => output.add(bias),
            None => Ok(output),
        }
    }

    fn named_parameters(&self) -> Vec<(String, Tensor<B>)> {
        let mut named = vec![("weight".to_string(), self.weight.clone())];
        if let Some(ref b) = self.bias {
            named.push(("bias".to_string(), b.clone()));
        }
        named
    }

    fn reset_parameters(&self) -> Result<()> {
        let k = Self::bound(self.in_features);
        init::uniform_(&self.weight, -k, k)?;
        if let Some(ref b) = self.bias {
            init::uniform_(b, -k, k)?;
        }
        Ok(())
    }
}
