// Shared — One module applied to each of several inputs
//
//   Shared(m).forward(x1, x2, x3) == (m(x1), m(x2), m(x3))
//
// All applications run the same module with the same parameters, so an
// update to `m` shows up in every output (weight sharing, siamese nets).
//
// The declared input shape is taken from the wrapped module's output
// shape, and the output shape is the wrapped module's output shape. Like
// the fan-out composers, Shared reports empty `params`, `trainable` and
// `regularizable` at its own level.

use std::cell::Cell;

use mosaic_core::backend::Backend;
use mosaic_core::dynamic_shape::IoShape;
use mosaic_core::error::Result;
use mosaic_core::tensor::Tensor;

use crate::fanout::output_shape_or_unknown;
use crate::module::Module;
use crate::value::Value;

/// Applies one module to every positional input.
pub struct Shared<B: Backend> {
    module: Box<dyn Module<B>>,
    input_shape: Option<IoShape>,
    training: Cell<bool>,
}

impl<B: Backend> Shared<B> {
    pub fn new<M: Module<B> + 'static>(module: M) -> Result<Self> {
        let input_shape = output_shape_or_unknown(&module)?;
        Ok(Shared {
            module: Box::new(module),
            input_shape,
            training: Cell::new(true),
        })
    }

    /// The shared module.
    pub fn module(&self) -> &dyn Module<B> {
        self.module.as_ref()
    }
}

impl<B: Backend> Module<B> for Shared<B> {
    fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>> {
        let outputs = inputs
            .iter()
            .map(|x| self.module.forward(std::slice::from_ref(x)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Tuple(outputs))
    }

    fn input_shape(&self) -> Option<IoShape> {
        self.input_shape.clone()
    }

    fn output_shape(&self) -> Result<Option<IoShape>> {
        self.module.output_shape()
    }

    fn children(&self) -> Vec<(String, &dyn Module<B>)> {
        vec![("module".to_string(), self.module.as_ref())]
    }

    fn params(&self) -> Vec<Tensor<B>> {
        Vec::new()
    }

    fn trainable(&self) -> Vec<Tensor<B>> {
        Vec::new()
    }

    fn regularizable(&self) -> Vec<Tensor<B>> {
        Vec::new()
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
        self.module.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.training.get()
    }
}
