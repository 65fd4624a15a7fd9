// Dropout — Regularization via random zeroing
//
// During training, Dropout sets elements to zero with probability p and
// scales the rest by 1/(1-p) to preserve the expected value. In eval mode
// it is the identity.
//
// The training flag uses Cell<bool>, so set_training works through the
// Layer trait's &self interface.

use std::cell::Cell;

use mosaic_core::backend::Backend;
use mosaic_core::bail;
use mosaic_core::error::Result;
use mosaic_core::tensor::Tensor;

use crate::layer::Layer;

/// Applies dropout regularization.
pub struct Dropout {
    /// Probability of an element being zeroed.
    p: f64,
    training: Cell<bool>,
}

impl Dropout {
    /// Create a new Dropout layer. `p` must lie in [0, 1).
    pub fn new(p: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            bail!("Dropout probability must be in [0, 1), got {p}");
        }
        Ok(Dropout {
            p,
            training: Cell::new(true),
        })
    }

    pub fn p(&self) -> f64 {
        self.p
    }
}

impl<B: Backend> Layer<B> for Dropout {
    fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        if !self.training.get() || self.p == 0.0 {
            return Ok(x.clone());
        }
        let scale = 1.0 / (1.0 - self.p);
        let mask: Vec<f64> = Tensor::<B>::rand(x.shape().clone(), x.dtype(), x.device())?
            .to_f64_vec()?
            .into_iter()
            .map(|u| if u >= self.p { scale } else { 0.0 })
            .collect();
        let mask = Tensor::<B>::from_f64_slice(&mask, x.shape().clone(), x.dtype(), x.device())?;
        x.mul(&mask)
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
    }

    fn is_training(&self) -> bool {
        self.training.get()
    }
}
