use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;
use std::fmt;

// Backend — Abstraction over compute devices
//
// The composition layer never looks inside a tensor. What it needs from the
// engine is small: allocate (zero-filled) storage for a shape on a device,
// run element-wise and reduction kernels, and copy data to the host. Each
// backend implements this trait with its own storage type.
//
// Storage is always contiguous and row-major. Shape-movement operations
// (transpose, concatenation) are done by `Tensor` on host data, so a
// backend only ever sees flat buffers plus the shapes that describe them.

/// Identifies a compute device (e.g., "cpu", "cuda:0").
pub trait BackendDevice: Clone + fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for this device.
    fn name(&self) -> String;
}

/// A storage buffer that holds tensor data on a specific device.
pub trait BackendStorage: Clone + Send + Sync + 'static {
    /// The data type of the elements in this storage.
    fn dtype(&self) -> DType;

    /// Total number of elements in this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Square,
    Relu,
    Sigmoid,
    Tanh,
}

/// Reduction operations along dimension(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

/// The main Backend trait. Implementing this for a struct (e.g., CpuBackend)
/// makes that struct a complete compute backend.
///
/// All operations return new storage; nothing here mutates its inputs.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// The device type for this backend.
    type Device: BackendDevice;
    /// The storage type for this backend.
    type Storage: BackendStorage;

    //  Creation

    /// Allocate storage filled with zeros.
    fn zeros(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage> {
        Self::full(shape, 0.0, dtype, device)
    }

    /// Allocate storage filled with a constant value.
    fn full(shape: &Shape, val: f64, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage from a flat f64 slice, converting to the target dtype.
    fn from_f64_slice(data: &[f64], dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage with random uniform values in [0, 1).
    fn rand_uniform(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage with random normal values (mean=0, std=1).
    fn rand_normal(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    //  Element-wise ops

    /// Apply a binary op element-wise with NumPy broadcasting.
    /// `out_shape` is the pre-validated broadcast shape.
    fn binary_op(
        op: BinaryOp,
        lhs: &Self::Storage,
        lhs_shape: &Shape,
        rhs: &Self::Storage,
        rhs_shape: &Shape,
        out_shape: &Shape,
    ) -> Result<Self::Storage>;

    /// Apply a unary op element-wise: result[i] = op(input[i]).
    fn unary_op(op: UnaryOp, input: &Self::Storage) -> Result<Self::Storage>;

    /// Affine transform: result = input * mul + add.
    fn affine(input: &Self::Storage, mul: f64, add: f64) -> Result<Self::Storage>;

    //  Reductions

    /// Reduce along specific dimensions (always keeping them as size 1;
    /// the tensor layer drops them when asked to).
    /// If `dims` is empty, reduce over all elements.
    fn reduce_op(
        op: ReduceOp,
        input: &Self::Storage,
        shape: &Shape,
        dims: &[usize],
    ) -> Result<Self::Storage>;

    //  Matrix multiplication

    /// Matrix multiply `[.., m, k] @ [.., k, n]`. Batch dims of `rhs` are
    /// either equal to `lhs`'s or absent (a shared 2-D right operand).
    fn matmul(
        lhs: &Self::Storage,
        lhs_shape: &Shape,
        rhs: &Self::Storage,
        rhs_shape: &Shape,
    ) -> Result<Self::Storage>;

    //  Host transfer

    /// Copy data from this storage to a Vec<f64> on the host.
    fn to_f64_vec(input: &Self::Storage) -> Result<Vec<f64>>;
}
