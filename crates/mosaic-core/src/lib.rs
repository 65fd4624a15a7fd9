//! # mosaic-core
//!
//! Tensor primitives, shapes, and the backend contract for mosaic.
//!
//! This crate provides:
//! - [`Tensor`]: shared-storage n-dimensional array handle
//! - [`Shape`] / [`DynShape`] / [`IoShape`]: concrete and declared shapes
//! - [`DType`]: element types (F16, BF16, F32, F64, I64)
//! - [`Backend`] trait: abstraction over compute devices
// - DType: supported numeric types
// - Shape: concrete n-dimensional shape
// - DynShape / IoShape: declared shapes with dynamic dims, tuples of them
// - Backend trait: what the composition layer needs from an engine
// - Tensor: the handle modules hold and pass around

pub mod backend;
pub mod dtype;
pub mod dynamic_shape;
pub mod error;
pub mod shape;
pub mod tensor;

pub use backend::{Backend, BackendDevice, BackendStorage, BinaryOp, ReduceOp, UnaryOp};
pub use dtype::DType;
pub use dynamic_shape::{Dim, DynShape, IoShape};
pub use error::{Error, Result};
pub use shape::Shape;
pub use tensor::Tensor;
