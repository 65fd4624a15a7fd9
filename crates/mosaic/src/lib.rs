//! # Mosaic
//!
//! Shape-aware composition and introspection for neural network modules.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use mosaic::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `mosaic-core` | Tensor, Shape, DynShape, IoShape, DType, Backend trait, errors |
//! | `mosaic-cpu` | Reference CPU backend |
//! | `mosaic-nn` | Module trait, composers, wrappers, shape probing, layers, persistence |

/// Re-export core types.
pub use mosaic_core::{
    backend::{Backend, BackendDevice, BackendStorage, BinaryOp, ReduceOp, UnaryOp},
    DType, Dim, DynShape, Error, IoShape, Result, Shape, Tensor,
};

/// Re-export CPU backend.
pub use mosaic_cpu::{CpuBackend, CpuDevice, CpuStorage, CpuTensor};

/// Re-export the composition layer and layers.
pub mod nn {
    pub use mosaic_nn::*;
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{
        describe, wrap, BatchNorm, Branch, Dropout, Flatten, Fork, Lambda, Layer, Linear, Module,
        Parallel, ReLU, Sequential, ShapeProbe, Shared, Sigmoid, Tanh, Value, Wrapped,
    };
    pub use crate::{
        CpuBackend, CpuDevice, CpuTensor, DType, Dim, DynShape, Error, IoShape, Result, Shape,
        Tensor,
    };
}
