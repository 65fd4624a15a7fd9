use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::backend::{Backend, BinaryOp, ReduceOp, UnaryOp};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — The handle modules hold and pass around
//
// A Tensor is an n-dimensional array of numbers on some backend device.
// The composition layer treats tensors as opaque values; it needs their
// shape, dtype and device, and for parameters a gradient-tracking flag.
//
// MEMORY MODEL:
//
//   Tensor is a cheap handle around Arc<TensorInner>. Cloning it never
//   copies data, so a module that "returns its parameters" hands out
//   references to the very storage it computes with.
//
//   Storage sits behind Arc<RwLock<Storage>> so that in-place updates
//   (`update_data_inplace`, `assign`) are seen by every handle sharing it.
//   This is how loading a state mapping or re-initializing parameters
//   reaches the layers that own them.
//
// GRADIENT FLAG:
//
//   `is_variable` marks a trainable parameter. The flag lives in the shared
//   inner value, so `set_requires_grad` on any clone is visible through the
//   module that owns the parameter. `set_variable` / `freeze` instead return
//   a new handle over the same storage with the flag set or cleared.

/// Inner data of a tensor, shared via Arc.
struct TensorInner<B: Backend> {
    /// The raw data stored on the backend's device.
    storage: Arc<RwLock<B::Storage>>,
    /// Row-major shape; storage is always contiguous.
    shape: Shape,
    dtype: DType,
    device: B::Device,
    /// Whether this tensor is a trainable variable.
    is_variable: AtomicBool,
}

/// An n-dimensional array of numbers on a specific backend.
///
/// # Example
/// ```ignore
/// use mosaic_cpu::{CpuBackend, CpuDevice};
///
/// let a = Tensor::<CpuBackend>::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F32, &CpuDevice)?;
/// let b = Tensor::<CpuBackend>::ones((2, 2), DType::F32, &CpuDevice)?;
/// let c = a.add(&b)?;
/// ```
pub struct Tensor<B: Backend> {
    inner: Arc<TensorInner<B>>,
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={:?}, variable={})",
            self.inner.shape,
            self.inner.dtype,
            self.inner.device,
            self.is_variable(),
        )
    }
}

impl<B: Backend> Tensor<B> {
    // Internal constructors

    fn from_storage(storage: B::Storage, shape: Shape, dtype: DType, device: B::Device) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                storage: Arc::new(RwLock::new(storage)),
                shape,
                dtype,
                device,
                is_variable: AtomicBool::new(false),
            }),
        }
    }

    /// A new handle over the same storage with a different shape or flag.
    fn view(&self, shape: Shape, is_variable: bool) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                storage: Arc::clone(&self.inner.storage),
                shape,
                dtype: self.inner.dtype,
                device: self.inner.device.clone(),
                is_variable: AtomicBool::new(is_variable),
            }),
        }
    }

    /// A fresh tensor on this tensor's device from host data.
    fn with_data(&self, data: &[f64], shape: Shape) -> Result<Self> {
        Self::from_f64_slice(data, shape, self.dtype(), self.device())
    }

    // Accessors

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// The dimensions as a slice (shortcut for shape().dims()).
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.inner.shape.elem_count()
    }

    /// Data type of the elements.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// The device this tensor is on.
    pub fn device(&self) -> &B::Device {
        &self.inner.device
    }

    /// Whether this tensor tracks gradients.
    pub fn is_variable(&self) -> bool {
        self.inner.is_variable.load(Ordering::Relaxed)
    }

    /// Whether two handles read and write the same underlying buffer.
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.storage, &other.inner.storage)
    }

    fn read_storage(&self) -> Result<std::sync::RwLockReadGuard<'_, B::Storage>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<std::sync::RwLockWriteGuard<'_, B::Storage>> {
        self.inner
            .storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    // In-place mutation

    /// Update the underlying storage data in place.
    ///
    /// Every tensor sharing this storage (e.g., the clone held by a module)
    /// sees the new values. The data must have exactly `elem_count()`
    /// elements; it is converted to this tensor's dtype.
    pub fn update_data_inplace(&self, new_data: &[f64]) -> Result<()> {
        let expected = self.elem_count();
        if new_data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape: self.shape().clone(),
                expected,
                got: new_data.len(),
            });
        }
        let new_storage = B::from_f64_slice(new_data, self.dtype(), self.device())?;
        let mut guard = self.write_storage()?;
        *guard = new_storage;
        Ok(())
    }

    /// Copy the values of `src` into this tensor's storage.
    /// Shapes must match exactly; dtypes are converted.
    pub fn assign(&self, src: &Self) -> Result<()> {
        if self.shape() != src.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: src.shape().clone(),
            });
        }
        let data = src.to_f64_vec()?;
        self.update_data_inplace(&data)
    }

    /// Set or clear the gradient-tracking flag on this tensor and every
    /// handle cloned from it.
    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.inner
            .is_variable
            .store(requires_grad, Ordering::Relaxed);
    }

    // Creation methods

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let storage = B::zeros(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        Self::full(shape, 1.0, dtype, device)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(
        shape: impl Into<Shape>,
        val: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        let storage = B::full(&shape, val, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor from a flat slice of f64 values.
    /// The data is converted to the specified dtype.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: shape.clone(),
                expected: shape.elem_count(),
                got: data.len(),
            });
        }
        let storage = B::from_f64_slice(data, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor with random uniform values in [0, 1).
    pub fn rand(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let storage = B::rand_uniform(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor with random normal values (mean=0, std=1).
    pub fn randn(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let storage = B::rand_normal(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor of zeros with the same shape, dtype, and device as `other`.
    pub fn zeros_like(other: &Self) -> Result<Self> {
        Self::zeros(other.shape().clone(), other.dtype(), other.device())
    }

    // Gradient flag

    /// Mark this tensor as a variable (trainable parameter).
    pub fn set_variable(self) -> Self {
        self.view(self.shape().clone(), true)
    }

    /// Same storage, new handle with `is_variable = false`.
    pub fn freeze(&self) -> Self {
        self.view(self.shape().clone(), false)
    }

    /// Same storage, new handle that does not track gradients.
    pub fn detach(&self) -> Self {
        self.freeze()
    }

    // Shape manipulation

    /// Reshape to a new shape with the same element count.
    /// The result shares storage with `self`.
    pub fn reshape(&self, new_shape: impl Into<Shape>) -> Result<Self> {
        let new_shape = new_shape.into();
        let current_count = self.elem_count();
        let new_count = new_shape.elem_count();
        if current_count != new_count {
            return Err(Error::ReshapeElementMismatch {
                src: current_count,
                dst: new_count,
                dst_shape: new_shape,
            });
        }
        Ok(self.view(new_shape, false))
    }

    /// Swap two dimensions, materializing the result.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self> {
        let rank = self.rank();
        for d in [dim0, dim1] {
            if d >= rank {
                return Err(Error::DimOutOfRange { dim: d, rank });
            }
        }
        if dim0 == dim1 {
            return Ok(self.clone());
        }
        let mut out_dims = self.dims().to_vec();
        out_dims.swap(dim0, dim1);
        let out_shape = Shape::new(out_dims);

        // Source strides read in output order.
        let mut src_strides = self.shape().stride_contiguous();
        src_strides.swap(dim0, dim1);

        let src = self.to_f64_vec()?;
        let out_dims = out_shape.dims();
        let mut out = Vec::with_capacity(src.len());
        let mut index = vec![0usize; rank];
        for _ in 0..src.len() {
            let offset: usize = index.iter().zip(&src_strides).map(|(i, s)| i * s).sum();
            out.push(src[offset]);
            for d in (0..rank).rev() {
                index[d] += 1;
                if index[d] < out_dims[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        self.with_data(&out, out_shape)
    }

    /// Transpose a 2D matrix (shorthand for transpose(0, 1)).
    pub fn t(&self) -> Result<Self> {
        if self.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            });
        }
        self.transpose(0, 1)
    }

    /// Concatenate tensors along `dim`. All inputs must share dtype, rank,
    /// and every dimension other than `dim`.
    pub fn cat(tensors: &[Self], dim: usize) -> Result<Self> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::msg("cat requires at least one tensor"))?;
        let rank = first.rank();
        if dim >= rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        let mut cat_len = 0;
        for t in tensors {
            if t.dtype() != first.dtype() {
                return Err(Error::DTypeMismatch {
                    expected: first.dtype(),
                    got: t.dtype(),
                });
            }
            let compatible = t.rank() == rank
                && t.dims()
                    .iter()
                    .zip(first.dims())
                    .enumerate()
                    .all(|(d, (a, b))| d == dim || a == b);
            if !compatible {
                return Err(Error::ShapeMismatch {
                    expected: first.shape().clone(),
                    got: t.shape().clone(),
                });
            }
            cat_len += t.dims()[dim];
        }

        let outer: usize = first.dims()[..dim].iter().product();
        let inner: usize = first.dims()[dim + 1..].iter().product();
        let sources = tensors
            .iter()
            .map(|t| t.to_f64_vec())
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(outer * cat_len * inner);
        for o in 0..outer {
            for (t, src) in tensors.iter().zip(&sources) {
                let block = t.dims()[dim] * inner;
                out.extend_from_slice(&src[o * block..(o + 1) * block]);
            }
        }
        let mut out_dims = first.dims().to_vec();
        out_dims[dim] = cat_len;
        first.with_data(&out, Shape::new(out_dims))
    }

    // Arithmetic operations

    /// Element-wise addition: self + rhs.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Add)
    }

    /// Element-wise subtraction: self - rhs.
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Sub)
    }

    /// Element-wise multiplication: self * rhs.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Mul)
    }

    /// Element-wise division: self / rhs.
    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Div)
    }

    fn binary_op(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        let out_shape = Shape::broadcast_shape(self.shape(), rhs.shape())?;
        let storage = {
            let lhs_storage = self.read_storage()?;
            let rhs_storage = rhs.read_storage()?;
            B::binary_op(
                op,
                &lhs_storage,
                self.shape(),
                &rhs_storage,
                rhs.shape(),
                &out_shape,
            )?
        };
        Ok(Self::from_storage(
            storage,
            out_shape,
            self.dtype(),
            self.device().clone(),
        ))
    }

    // Unary operations

    pub fn neg(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Neg)
    }

    pub fn abs(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Abs)
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Sqrt)
    }

    pub fn square(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Square)
    }

    /// ReLU activation: max(0, x).
    pub fn relu(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Relu)
    }

    /// Sigmoid activation: 1 / (1 + e^(-x)).
    pub fn sigmoid(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Sigmoid)
    }

    pub fn tanh(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Tanh)
    }

    fn unary_op(&self, op: UnaryOp) -> Result<Self> {
        let storage = B::unary_op(op, &*self.read_storage()?)?;
        Ok(Self::from_storage(
            storage,
            self.shape().clone(),
            self.dtype(),
            self.device().clone(),
        ))
    }

    /// Affine transform: result[i] = self[i] * mul + add.
    pub fn affine(&self, mul: f64, add: f64) -> Result<Self> {
        let storage = B::affine(&*self.read_storage()?, mul, add)?;
        Ok(Self::from_storage(
            storage,
            self.shape().clone(),
            self.dtype(),
            self.device().clone(),
        ))
    }

    // Reductions

    /// Sum all elements, returning a scalar tensor.
    pub fn sum_all(&self) -> Result<Self> {
        self.reduce_op(ReduceOp::Sum, &[], false)
    }

    /// Sum along a specific dimension.
    pub fn sum(&self, dim: usize, keep_dim: bool) -> Result<Self> {
        self.reduce_op(ReduceOp::Sum, &[dim], keep_dim)
    }

    /// Mean of all elements, returning a scalar tensor.
    pub fn mean_all(&self) -> Result<Self> {
        self.reduce_op(ReduceOp::Mean, &[], false)
    }

    /// Mean along a specific dimension.
    pub fn mean(&self, dim: usize, keep_dim: bool) -> Result<Self> {
        self.reduce_op(ReduceOp::Mean, &[dim], keep_dim)
    }

    /// Max along a specific dimension.
    pub fn max(&self, dim: usize, keep_dim: bool) -> Result<Self> {
        self.reduce_op(ReduceOp::Max, &[dim], keep_dim)
    }

    /// Min along a specific dimension.
    pub fn min(&self, dim: usize, keep_dim: bool) -> Result<Self> {
        self.reduce_op(ReduceOp::Min, &[dim], keep_dim)
    }

    fn reduce_op(&self, op: ReduceOp, dims: &[usize], keep_dim: bool) -> Result<Self> {
        for &d in dims {
            if d >= self.rank() {
                return Err(Error::DimOutOfRange {
                    dim: d,
                    rank: self.rank(),
                });
            }
        }
        let storage = B::reduce_op(op, &*self.read_storage()?, self.shape(), dims)?;

        let result_shape = if dims.is_empty() {
            Shape::from(())
        } else if keep_dim {
            let mut new_dims = self.dims().to_vec();
            for &d in dims {
                new_dims[d] = 1;
            }
            Shape::new(new_dims)
        } else {
            Shape::new(
                self.dims()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !dims.contains(i))
                    .map(|(_, &d)| d)
                    .collect(),
            )
        };

        Ok(Self::from_storage(
            storage,
            result_shape,
            self.dtype(),
            self.device().clone(),
        ))
    }

    // Matrix multiplication

    /// Matrix multiplication: self @ rhs.
    ///
    /// - [m, k] @ [k, n] → [m, n]
    /// - Batched: [b, m, k] @ [b, k, n] → [b, m, n]
    /// - Shared right operand: [b, m, k] @ [k, n] → [b, m, n]
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        if self.rank() < 2 || rhs.rank() < 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank().min(rhs.rank()),
            });
        }
        let lhs_dims = self.dims();
        let rhs_dims = rhs.dims();
        let m = lhs_dims[lhs_dims.len() - 2];
        let k1 = lhs_dims[lhs_dims.len() - 1];
        let k2 = rhs_dims[rhs_dims.len() - 2];
        let n = rhs_dims[rhs_dims.len() - 1];
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let lhs_batch = &lhs_dims[..lhs_dims.len() - 2];
        let rhs_batch = &rhs_dims[..rhs_dims.len() - 2];
        if !rhs_batch.is_empty() && rhs_batch != lhs_batch {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: rhs.shape().clone(),
            });
        }

        let storage = {
            let lhs_storage = self.read_storage()?;
            let rhs_storage = rhs.read_storage()?;
            B::matmul(&lhs_storage, self.shape(), &rhs_storage, rhs.shape())?
        };

        let mut result_dims = lhs_batch.to_vec();
        result_dims.push(m);
        result_dims.push(n);
        Ok(Self::from_storage(
            storage,
            Shape::new(result_dims),
            self.dtype(),
            self.device().clone(),
        ))
    }

    // Data extraction

    /// Extract all elements as a flat Vec<f64>.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        B::to_f64_vec(&*self.read_storage()?)
    }

    /// Extract a scalar value (tensor must have exactly 1 element).
    pub fn to_scalar_f64(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        let vec = self.to_f64_vec()?;
        Ok(vec[0])
    }
}
