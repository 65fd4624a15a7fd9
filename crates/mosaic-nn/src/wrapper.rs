// Wrapped — Lift a plain Layer into a shape-aware Module
//
// Layers (Linear, BatchNorm, ...) compute but do not know what shape they
// were built for. Wrapped adds that metadata without touching the layer:
//
//   let fc = wrap(Linear::<B>::new(4, 8, true, DType::F32, &dev)?, &dev)
//       .with_input_shape(vec![None, Some(4)]);
//   fc.output_shape()?;   // Some([?, 8]), found by running fc once
//
// Execution, parameters and buffers are delegated to the layer unchanged,
// and the wrapper reports the layer's type name. The train/eval flag is
// kept on the wrapper and forwarded to the layer, so stateless layers
// (Linear, activations) still report the mode they were put in.

use std::cell::Cell;

use mosaic_core::backend::Backend;
use mosaic_core::dynamic_shape::IoShape;
use mosaic_core::error::{Error, Result};
use mosaic_core::tensor::Tensor;

use crate::layer::Layer;
use crate::module::{short_type_name, Module};
use crate::probe::ShapeProbe;
use crate::value::Value;

/// A Layer with declared shapes and a probe for output shape inference.
pub struct Wrapped<B: Backend, L: Layer<B>> {
    layer: L,
    input_shape: Option<IoShape>,
    output_shape: Option<IoShape>,
    probe: ShapeProbe<B>,
    training: Cell<bool>,
}

/// Wrap `layer`; shape inference runs on `device`.
pub fn wrap<B: Backend, L: Layer<B>>(layer: L, device: &B::Device) -> Wrapped<B, L> {
    Wrapped::new(layer, device)
}

impl<B: Backend, L: Layer<B>> Wrapped<B, L> {
    pub fn new(layer: L, device: &B::Device) -> Self {
        let training = Cell::new(layer.is_training());
        Wrapped {
            layer,
            input_shape: None,
            output_shape: None,
            probe: ShapeProbe::new(device),
            training,
        }
    }

    pub fn with_input_shape(mut self, shape: impl Into<IoShape>) -> Self {
        self.input_shape = Some(shape.into());
        self
    }

    /// Declare the output shape; no probing happens afterwards.
    pub fn with_output_shape(mut self, shape: impl Into<IoShape>) -> Self {
        self.output_shape = Some(shape.into());
        self
    }

    pub fn with_probe(mut self, probe: ShapeProbe<B>) -> Self {
        self.probe = probe;
        self
    }

    /// The wrapped layer.
    pub fn inner(&self) -> &L {
        &self.layer
    }

    pub fn into_inner(self) -> L {
        self.layer
    }
}

impl<B: Backend, L: Layer<B>> Module<B> for Wrapped<B, L> {
    fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>> {
        match inputs {
            [Value::Tensor(x)] => Ok(Value::Tensor(self.layer.forward(x)?)),
            [other] => Err(Error::ValueKind {
                expected: "tensor",
                got: other.kind(),
            }),
            _ => Err(Error::msg(format!(
                "{} takes exactly one input, got {}",
                self.name(),
                inputs.len()
            ))),
        }
    }

    fn name(&self) -> String {
        short_type_name(std::any::type_name::<L>())
    }

    fn input_shape(&self) -> Option<IoShape> {
        self.input_shape.clone()
    }

    fn output_shape(&self) -> Result<Option<IoShape>> {
        self.probe.infer(self, self.output_shape.as_ref())
    }

    fn own_parameters(&self) -> Vec<(String, Tensor<B>)> {
        self.layer.named_parameters()
    }

    fn own_buffers(&self) -> Vec<(String, Tensor<B>)> {
        self.layer.named_buffers()
    }

    fn reset_parameters(&self) -> Result<()> {
        self.layer.reset_parameters()
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
        self.layer.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.training.get()
    }
}
