// CPU Backend — Reference compute backend on host memory
//
// This crate provides the CPU implementation of the mosaic Backend trait.
// It is the engine the composition layer is tested against and the one
// shape inference runs on when no accelerator is involved.
//
// ARCHITECTURE:
// - CpuDevice is a unit struct; there is only one host
// - CpuStorage is an enum over Vec<T> for each supported dtype
// - Kernels compute in f64 and convert back to the storage dtype, which
//   keeps one code path for F16/BF16/F32/F64/I64
// - Random numbers come from rand's thread-local generator
//
// USAGE:
//   let t = Tensor::<CpuBackend>::zeros((2, 3), DType::F32, &CpuDevice)?;

use half::{bf16, f16};
use rand::Rng;
use rand_distr::StandardNormal;

use mosaic_core::backend::{
    Backend, BackendDevice, BackendStorage, BinaryOp, ReduceOp, UnaryOp,
};
use mosaic_core::dtype::DType;
use mosaic_core::error::{Error, Result};
use mosaic_core::shape::Shape;
use mosaic_core::tensor::Tensor;

/// Convenience alias for tensors on the CPU backend.
pub type CpuTensor = Tensor<CpuBackend>;

// CpuDevice

/// The host device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuDevice;

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }
}

// CpuStorage — Host memory for each supported dtype

/// Host-side storage. Each variant wraps a Vec of the corresponding dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuStorage {
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I64(Vec<i64>),
}

impl BackendStorage for CpuStorage {
    fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
            CpuStorage::I64(_) => DType::I64,
        }
    }

    fn len(&self) -> usize {
        match self {
            CpuStorage::F16(v) => v.len(),
            CpuStorage::BF16(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
            CpuStorage::I64(v) => v.len(),
        }
    }
}

impl CpuStorage {
    /// Build storage of `dtype` from host f64 values.
    pub fn from_f64_vec(data: Vec<f64>, dtype: DType) -> Self {
        match dtype {
            DType::F16 => CpuStorage::F16(data.into_iter().map(f16::from_f64).collect()),
            DType::BF16 => CpuStorage::BF16(data.into_iter().map(bf16::from_f64).collect()),
            DType::F32 => CpuStorage::F32(data.into_iter().map(|v| v as f32).collect()),
            DType::F64 => CpuStorage::F64(data),
            DType::I64 => CpuStorage::I64(data.into_iter().map(|v| v as i64).collect()),
        }
    }

    /// Widen every element to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            CpuStorage::F16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::BF16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::F32(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::F64(v) => v.clone(),
            CpuStorage::I64(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        let data = self.to_f64_vec().into_iter().map(f).collect();
        Self::from_f64_vec(data, self.dtype())
    }
}

// Helpers

/// Advance a row-major multi-index over `dims`. Returns false on wrap-around.
fn next_index(index: &mut [usize], dims: &[usize]) -> bool {
    for d in (0..dims.len()).rev() {
        index[d] += 1;
        if index[d] < dims[d] {
            return true;
        }
        index[d] = 0;
    }
    false
}

fn offset(index: &[usize], strides: &[usize]) -> usize {
    index.iter().zip(strides).map(|(i, s)| i * s).sum()
}

fn apply_unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Abs => x.abs(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Square => x * x,
        UnaryOp::Relu => x.max(0.0),
        UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        UnaryOp::Tanh => x.tanh(),
    }
}

fn apply_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
    }
}

// CpuBackend — The Backend trait implementation

/// Marker type for the CPU backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Storage = CpuStorage;

    fn full(shape: &Shape, val: f64, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(CpuStorage::from_f64_vec(
            vec![val; shape.elem_count()],
            dtype,
        ))
    }

    fn from_f64_slice(data: &[f64], dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(CpuStorage::from_f64_vec(data.to_vec(), dtype))
    }

    fn rand_uniform(shape: &Shape, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        if !dtype.is_float() {
            return Err(Error::msg(format!(
                "rand_uniform not supported for {:?}",
                dtype
            )));
        }
        let mut rng = rand::thread_rng();
        let data = (0..shape.elem_count()).map(|_| rng.gen::<f64>()).collect();
        Ok(CpuStorage::from_f64_vec(data, dtype))
    }

    fn rand_normal(shape: &Shape, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        if !dtype.is_float() {
            return Err(Error::msg(format!(
                "rand_normal not supported for {:?}",
                dtype
            )));
        }
        let mut rng = rand::thread_rng();
        let data = (0..shape.elem_count())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        Ok(CpuStorage::from_f64_vec(data, dtype))
    }

    fn binary_op(
        op: BinaryOp,
        lhs: &CpuStorage,
        lhs_shape: &Shape,
        rhs: &CpuStorage,
        rhs_shape: &Shape,
        out_shape: &Shape,
    ) -> Result<CpuStorage> {
        let a = lhs.to_f64_vec();
        let b = rhs.to_f64_vec();
        let n = out_shape.elem_count();

        // Fast path: identical shapes, no broadcasting.
        if lhs_shape == rhs_shape {
            let data = a
                .iter()
                .zip(&b)
                .map(|(&x, &y)| apply_binary(op, x, y))
                .collect();
            return Ok(CpuStorage::from_f64_vec(data, lhs.dtype()));
        }

        let lhs_strides = lhs_shape.broadcast_strides(out_shape);
        let rhs_strides = rhs_shape.broadcast_strides(out_shape);
        let dims = out_shape.dims();
        let mut index = vec![0usize; dims.len()];
        let mut data = Vec::with_capacity(n);
        for _ in 0..n {
            let x = a[offset(&index, &lhs_strides)];
            let y = b[offset(&index, &rhs_strides)];
            data.push(apply_binary(op, x, y));
            next_index(&mut index, dims);
        }
        Ok(CpuStorage::from_f64_vec(data, lhs.dtype()))
    }

    fn unary_op(op: UnaryOp, input: &CpuStorage) -> Result<CpuStorage> {
        Ok(input.map(|x| apply_unary(op, x)))
    }

    fn affine(input: &CpuStorage, mul: f64, add: f64) -> Result<CpuStorage> {
        Ok(input.map(|x| x * mul + add))
    }

    fn reduce_op(
        op: ReduceOp,
        input: &CpuStorage,
        shape: &Shape,
        dims: &[usize],
    ) -> Result<CpuStorage> {
        let src = input.to_f64_vec();
        let in_dims = shape.dims();
        let reduce_all = dims.is_empty();
        let reduced = |d: usize| reduce_all || dims.contains(&d);

        let out_dims: Vec<usize> = in_dims
            .iter()
            .enumerate()
            .map(|(d, &n)| if reduced(d) { 1 } else { n })
            .collect();
        let out_shape = Shape::new(out_dims);
        let out_strides = out_shape.stride_contiguous();
        let out_len = out_shape.elem_count();

        let init = match op {
            ReduceOp::Sum | ReduceOp::Mean => 0.0,
            ReduceOp::Max => f64::NEG_INFINITY,
            ReduceOp::Min => f64::INFINITY,
        };
        let mut acc = vec![init; out_len];

        let mut index = vec![0usize; in_dims.len()];
        for &x in &src {
            let o: usize = index
                .iter()
                .enumerate()
                .map(|(d, &i)| if reduced(d) { 0 } else { i * out_strides[d] })
                .sum();
            acc[o] = match op {
                ReduceOp::Sum | ReduceOp::Mean => acc[o] + x,
                ReduceOp::Max => acc[o].max(x),
                ReduceOp::Min => acc[o].min(x),
            };
            next_index(&mut index, in_dims);
        }

        if op == ReduceOp::Mean {
            let count = (src.len() / out_len.max(1)).max(1) as f64;
            for v in &mut acc {
                *v /= count;
            }
        }
        Ok(CpuStorage::from_f64_vec(acc, input.dtype()))
    }

    fn matmul(
        lhs: &CpuStorage,
        lhs_shape: &Shape,
        rhs: &CpuStorage,
        rhs_shape: &Shape,
    ) -> Result<CpuStorage> {
        let a = lhs.to_f64_vec();
        let b = rhs.to_f64_vec();
        let ld = lhs_shape.dims();
        let rd = rhs_shape.dims();
        if ld.len() < 2 || rd.len() < 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: ld.len().min(rd.len()),
            });
        }
        let m = ld[ld.len() - 2];
        let k = ld[ld.len() - 1];
        let n = rd[rd.len() - 1];
        let batch: usize = ld[..ld.len() - 2].iter().product();
        let rhs_shared = rd.len() == 2;

        let mut out = vec![0.0; batch * m * n];
        for bi in 0..batch {
            let a_off = bi * m * k;
            let b_off = if rhs_shared { 0 } else { bi * k * n };
            let o_off = bi * m * n;
            for i in 0..m {
                for p in 0..k {
                    let av = a[a_off + i * k + p];
                    for j in 0..n {
                        out[o_off + i * n + j] += av * b[b_off + p * n + j];
                    }
                }
            }
        }
        Ok(CpuStorage::from_f64_vec(out, lhs.dtype()))
    }

    fn to_f64_vec(input: &CpuStorage) -> Result<Vec<f64>> {
        Ok(input.to_f64_vec())
    }
}
