// nn::init — Parameter initialization helpers
//
// Functions that create freshly initialized parameters, plus an in-place
// variant used by `reset_parameters`:
//
//   uniform(shape, low, high)         — U(low, high)
//   normal(shape, mean, std)          — N(mean, std)
//   kaiming_uniform(shape, a, mode)   — He uniform (for ReLU)
//   uniform_(&tensor, low, high)      — refill an existing tensor with U(low, high)
//
// The creating functions return tensors with `set_variable()` already
// called. `uniform_` writes through the tensor's shared storage, so a
// layer's own handle sees the new values and keeps its gradient flag.

use mosaic_core::backend::Backend;
use mosaic_core::dtype::DType;
use mosaic_core::error::Result;
use mosaic_core::shape::Shape;
use mosaic_core::tensor::Tensor;

/// Fan computation mode for Kaiming initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    /// Use fan_in (input features).
    FanIn,
    /// Use fan_out (output features).
    FanOut,
}

/// Compute (fan_in, fan_out) from a shape.
///
/// - For 1-D: fan_in = fan_out = dims[0]
/// - For 2-D: fan_in = dims[1], fan_out = dims[0]
/// - For 3-D+: the trailing dims count as a receptive field
pub(crate) fn compute_fans(shape: &Shape) -> (f64, f64) {
    let dims = shape.dims();
    match dims.len() {
        0 => (1.0, 1.0),
        1 => (dims[0] as f64, dims[0] as f64),
        2 => (dims[1] as f64, dims[0] as f64),
        _ => {
            let receptive_field: usize = dims[2..].iter().product();
            let fan_in = dims[1] as f64 * receptive_field as f64;
            let fan_out = dims[0] as f64 * receptive_field as f64;
            (fan_in, fan_out)
        }
    }
}

/// Initialize a tensor from a uniform distribution U(low, high).
pub fn uniform<B: Backend>(
    shape: impl Into<Shape>,
    low: f64,
    high: f64,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let t = Tensor::<B>::rand(shape, dtype, device)?
        .affine(high - low, low)?
        .set_variable();
    Ok(t)
}

/// Initialize a tensor from a normal distribution N(mean, std).
pub fn normal<B: Backend>(
    shape: impl Into<Shape>,
    mean: f64,
    std: f64,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let t = Tensor::<B>::randn(shape, dtype, device)?
        .affine(std, mean)?
        .set_variable();
    Ok(t)
}

/// Kaiming (He) uniform initialization.
///
/// Draws from U(-bound, bound) where bound = sqrt(3 * gain² / fan) and
/// gain² = 2 / (1 + a²).
///
/// # Arguments
/// - `a`: negative slope of the rectifier (0 for ReLU)
/// - `mode`: `FanIn` or `FanOut`
pub fn kaiming_uniform<B: Backend>(
    shape: impl Into<Shape>,
    a: f64,
    mode: FanMode,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let shape = shape.into();
    let (fan_in, fan_out) = compute_fans(&shape);
    let fan = match mode {
        FanMode::FanIn => fan_in,
        FanMode::FanOut => fan_out,
    };
    let gain_sq = 2.0 / (1.0 + a * a);
    let bound = (3.0 * gain_sq / fan).sqrt();
    uniform::<B>(shape, -bound, bound, dtype, device)
}

/// Refill `tensor` in place with samples from U(low, high).
pub fn uniform_<B: Backend>(tensor: &Tensor<B>, low: f64, high: f64) -> Result<()> {
    let fresh = Tensor::<B>::rand(tensor.shape().clone(), tensor.dtype(), tensor.device())?
        .affine(high - low, low)?;
    tensor.assign(&fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_cpu::{CpuBackend, CpuDevice};

    #[test]
    fn test_uniform_range_and_flag() -> Result<()> {
        let t = uniform::<CpuBackend>((10, 10), -0.5, 0.5, DType::F64, &CpuDevice)?;
        assert!(t.is_variable());
        assert!(t.to_f64_vec()?.iter().all(|&v| (-0.5..0.5).contains(&v)));
        Ok(())
    }

    #[test]
    fn test_normal_moments() -> Result<()> {
        let t = normal::<CpuBackend>(10_000usize, 3.0, 0.5, DType::F64, &CpuDevice)?;
        let data = t.to_f64_vec()?;
        let mean = data.iter().sum::<f64>() / data.len() as f64;
        assert!((mean - 3.0).abs() < 0.05, "mean was {mean}");
        Ok(())
    }

    #[test]
    fn test_kaiming_bound() -> Result<()> {
        // fan_in = 50, gain² = 2 → bound = sqrt(6 / 50)
        let bound = (6.0f64 / 50.0).sqrt();
        let t = kaiming_uniform::<CpuBackend>((20, 50), 0.0, FanMode::FanIn, DType::F64, &CpuDevice)?;
        assert!(t.to_f64_vec()?.iter().all(|&v| v.abs() <= bound));
        assert_eq!(compute_fans(&Shape::from((8, 4, 3, 3))), (36.0, 72.0));
        Ok(())
    }

    #[test]
    fn test_uniform_inplace_keeps_handle() -> Result<()> {
        let t = Tensor::<CpuBackend>::zeros((4, 4), DType::F32, &CpuDevice)?.set_variable();
        let alias = t.clone();
        uniform_(&t, 1.0, 2.0)?;
        assert!(alias.to_f64_vec()?.iter().all(|&v| (1.0..=2.0).contains(&v)));
        assert!(alias.is_variable());
        Ok(())
    }
}
