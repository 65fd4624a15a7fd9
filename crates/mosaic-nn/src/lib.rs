//! # mosaic-nn
//!
//! Shape-aware composition and introspection for neural network modules.
//!
//! Everything here builds on the [`Module`] trait: a unit of computation
//! that declares its input shape, can report its output shape, and exposes
//! its parameters, trainable parameters and regularizable weights.
//!
//! 1. **Module** — declared shapes, derived views, save/load
//! 2. **Wrapped** — lift a plain [`Layer`] into a Module
//! 3. **Lambda** — an arbitrary function as a Module
//! 4. **Sequential** — a named chain of modules
//! 5. **Fork / Parallel** — fan-out over branches, one result per branch
//! 6. **Shared** — one module applied to several inputs
//! 7. **ShapeProbe** — output shapes by running a module once on scratch data
//! 8. **Layers** — Linear, BatchNorm, Dropout, Flatten, activations
//!
//! Modules are generic over `Backend`, so the same composition runs on any
//! backend that implements the contract in `mosaic-core`.

pub mod activation;
pub mod batchnorm;
pub mod dropout;
pub mod fanout;
pub mod flatten;
pub mod init;
pub mod lambda;
pub mod layer;
pub mod linear;
pub mod module;
pub mod probe;
pub mod safetensors;
pub mod sequential;
pub mod shared;
pub mod value;
pub mod wrapper;

pub use activation::{ReLU, Sigmoid, Tanh};
pub use batchnorm::BatchNorm;
pub use dropout::Dropout;
pub use fanout::{Branch, Fork, Parallel};
pub use flatten::Flatten;
pub use lambda::Lambda;
pub use layer::Layer;
pub use linear::Linear;
pub use module::{describe, Module};
pub use probe::ShapeProbe;
pub use sequential::Sequential;
pub use shared::Shared;
pub use value::Value;
pub use wrapper::{wrap, Wrapped};
