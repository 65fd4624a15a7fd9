// Lambda — A module built from a plain function
//
// Not every stage of a model deserves its own type. Lambda turns any
// function over positional values into a Module, optionally with declared
// input and output shapes so it composes with shape-aware containers.
//
//   let double = Lambda::new(|xs: &[Value<B>]| Ok(xs[0].as_tensor()?.affine(2.0, 0.0)?.into()), &dev)
//       .with_input_shape(vec![None, Some(4)]);
//
// Auxiliary arguments are bound once with `Lambda::bind`, and the function
// receives them by reference on every call.
//
// Lambda has no parameters; its output shape is declared or inferred by
// running the function through a ShapeProbe. It still records train/eval
// mode so a whole tree reports inference after `eval()`.

use std::cell::Cell;

use mosaic_core::backend::Backend;
use mosaic_core::dynamic_shape::IoShape;
use mosaic_core::error::Result;
use mosaic_core::tensor::Tensor;

use crate::module::{short_type_name, Module};
use crate::probe::ShapeProbe;
use crate::value::Value;

type LambdaFn<B> = Box<dyn Fn(&[Value<B>]) -> Result<Value<B>>>;

/// A parameter-free module wrapping a function.
pub struct Lambda<B: Backend> {
    func: LambdaFn<B>,
    name: String,
    input_shape: Option<IoShape>,
    output_shape: Option<IoShape>,
    probe: ShapeProbe<B>,
    training: Cell<bool>,
}

/// The function's own name for fn items, "lambda" for closures.
fn func_name<F>() -> String {
    let name = short_type_name(std::any::type_name::<F>());
    if name.contains("{{closure}}") {
        "lambda".to_string()
    } else {
        name
    }
}

impl<B: Backend> Lambda<B> {
    /// Wrap `f`. Shape inference runs on `device`.
    pub fn new<F>(f: F, device: &B::Device) -> Self
    where
        F: Fn(&[Value<B>]) -> Result<Value<B>> + 'static,
    {
        Lambda {
            name: func_name::<F>(),
            func: Box::new(f),
            input_shape: None,
            output_shape: None,
            probe: ShapeProbe::new(device),
            training: Cell::new(true),
        }
    }

    /// Wrap `f` with auxiliary arguments passed by reference on every call.
    pub fn bind<A, F>(f: F, args: A, device: &B::Device) -> Self
    where
        A: 'static,
        F: Fn(&[Value<B>], &A) -> Result<Value<B>> + 'static,
    {
        Lambda {
            name: func_name::<F>(),
            func: Box::new(move |inputs: &[Value<B>]| f(inputs, &args)),
            input_shape: None,
            output_shape: None,
            probe: ShapeProbe::new(device),
            training: Cell::new(true),
        }
    }

    /// A module that ignores its inputs and returns `value`. Both declared
    /// shapes are the constant's shape.
    pub fn constant(value: Tensor<B>) -> Self {
        let shape = IoShape::from(value.shape());
        let probe = ShapeProbe::new(value.device()).with_dtype(value.dtype());
        let func: LambdaFn<B> = Box::new(move |_: &[Value<B>]| Ok(Value::Tensor(value.clone())));
        Lambda {
            name: "constant".to_string(),
            func,
            input_shape: Some(shape.clone()),
            output_shape: Some(shape),
            probe,
            training: Cell::new(true),
        }
    }

    /// Override the reported name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input_shape(mut self, shape: impl Into<IoShape>) -> Self {
        self.input_shape = Some(shape.into());
        self
    }

    pub fn with_output_shape(mut self, shape: impl Into<IoShape>) -> Self {
        self.output_shape = Some(shape.into());
        self
    }

    /// Use `probe` for output shape inference.
    pub fn with_probe(mut self, probe: ShapeProbe<B>) -> Self {
        self.probe = probe;
        self
    }
}

impl<B: Backend> Module<B> for Lambda<B> {
    fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>> {
        (self.func)(inputs)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn input_shape(&self) -> Option<IoShape> {
        self.input_shape.clone()
    }

    fn output_shape(&self) -> Result<Option<IoShape>> {
        self.probe.infer(self, self.output_shape.as_ref())
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
    }

    fn is_training(&self) -> bool {
        self.training.get()
    }
}
