// Sequential — A chain of modules applied one after another
//
// The output of each stage becomes the input to the next:
//
//   let model = Sequential::new()
//       .with_input_shape(vec![None, Some(784)])
//       .add(wrap(linear1, &dev))
//       .add(wrap(ReLU, &dev))
//       .add(wrap(linear2, &dev));
//
//   let output = model.forward_tensor(&input)?;
//
// Stages are named: `add` uses the position ("0", "1", ...), `add_named`
// takes an explicit name. Parameter paths are "<stage>.<param>".
//
// Inputs after the first are forwarded unchanged to every stage, so a
// chain of modules can share side inputs such as a mask.
//
// Stages are held behind Rc so `slice` returns a sub-chain that runs the
// very same modules (and the same parameters) as the chain it came from.

use std::cell::Cell;
use std::ops::Range;
use std::rc::Rc;

use mosaic_core::backend::Backend;
use mosaic_core::bail;
use mosaic_core::dynamic_shape::IoShape;
use mosaic_core::error::{Error, Result};

use crate::module::Module;
use crate::value::Value;

/// An ordered, named chain of modules.
///
/// Sequential itself implements Module, so it can be nested.
pub struct Sequential<B: Backend> {
    stages: Vec<(String, Rc<dyn Module<B>>)>,
    input_shape: Option<IoShape>,
    training: Cell<bool>,
}

impl<B: Backend> Sequential<B> {
    /// Create an empty Sequential.
    pub fn new() -> Self {
        Sequential {
            stages: Vec::new(),
            input_shape: None,
            training: Cell::new(true),
        }
    }

    /// Declare the shape the first stage consumes.
    pub fn with_input_shape(mut self, shape: impl Into<IoShape>) -> Self {
        self.input_shape = Some(shape.into());
        self
    }

    /// Append a stage named by its position. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add<M: Module<B> + 'static>(mut self, module: M) -> Self {
        let name = self.stages.len().to_string();
        self.stages.push((name, Rc::new(module)));
        self
    }

    /// Append a stage under `name`. Names must be unique.
    pub fn add_named<M: Module<B> + 'static>(
        mut self,
        name: impl Into<String>,
        module: M,
    ) -> Result<Self> {
        let name = name.into();
        if self.stages.iter().any(|(n, _)| *n == name) {
            return Err(Error::DuplicateChild(name));
        }
        self.stages.push((name, Rc::new(module)));
        Ok(self)
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the sequential is empty.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stage at `index`.
    pub fn get(&self, index: usize) -> Option<&dyn Module<B>> {
        self.stages.get(index).map(|(_, m)| m.as_ref())
    }

    /// Stages with their names, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Module<B>)> {
        self.stages.iter().map(|(n, m)| (n.as_str(), m.as_ref()))
    }

    /// A new Sequential over the stages in `range`, sharing them with this
    /// one. Its input shape is the first selected stage's input shape.
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.stages.len() {
            bail!(
                "slice {}..{} out of range for Sequential of length {}",
                range.start,
                range.end,
                self.stages.len()
            );
        }
        let stages = self.stages[range].to_vec();
        let input_shape = stages.first().and_then(|(_, m)| m.input_shape());
        Ok(Sequential {
            stages,
            input_shape,
            training: Cell::new(self.training.get()),
        })
    }
}

impl<B: Backend> Default for Sequential<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Module<B> for Sequential<B> {
    fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>> {
        let (first, extra) = inputs.split_first().ok_or_else(|| Error::MissingInput {
            module: self.name(),
            expected: 1,
            got: 0,
        })?;
        let mut args = Vec::with_capacity(inputs.len());
        args.push(first.clone());
        args.extend_from_slice(extra);
        for (_, stage) in &self.stages {
            args[0] = stage.forward(&args)?;
        }
        Ok(args.swap_remove(0))
    }

    fn input_shape(&self) -> Option<IoShape> {
        self.input_shape.clone()
    }

    fn output_shape(&self) -> Result<Option<IoShape>> {
        if self.input_shape.is_none() {
            return Ok(None);
        }
        match self.stages.last() {
            Some((_, last)) => last.output_shape(),
            None => Ok(self.input_shape.clone()),
        }
    }

    fn children(&self) -> Vec<(String, &dyn Module<B>)> {
        self.stages
            .iter()
            .map(|(n, m)| (n.clone(), m.as_ref()))
            .collect()
    }

    fn reset_parameters(&self) -> Result<()> {
        for (_, stage) in &self.stages {
            stage.reset_parameters()?;
        }
        Ok(())
    }

    /// Propagate training mode to all stages.
    fn set_training(&self, training: bool) {
        self.training.set(training);
        for (_, stage) in &self.stages {
            stage.set_training(training);
        }
    }

    fn is_training(&self) -> bool {
        self.training.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::Lambda;
    use crate::wrapper::wrap;
    use crate::{Linear, ReLU};
    use mosaic_core::{DType, Tensor};
    use mosaic_cpu::{CpuBackend, CpuDevice, CpuTensor};

    fn add_const(c: f64) -> Lambda<CpuBackend> {
        Lambda::<CpuBackend>::bind(
            |xs: &[Value<CpuBackend>], c: &f64| Ok(xs[0].as_tensor()?.affine(1.0, *c)?.into()),
            c,
            &CpuDevice,
        )
    }

    #[test]
    fn test_chain_order() -> Result<()> {
        let scale = Lambda::<CpuBackend>::bind(
            |xs: &[Value<CpuBackend>], k: &f64| Ok(xs[0].as_tensor()?.affine(*k, 0.0)?.into()),
            10.0,
            &CpuDevice,
        );
        let seq = Sequential::new().add(add_const(1.0)).add(scale).add(add_const(2.0));
        let x = CpuTensor::zeros(1usize, DType::F64, &CpuDevice)?;
        // ((0 + 1) * 10) + 2
        assert_eq!(seq.forward_tensor(&x)?.to_f64_vec()?, vec![12.0]);
        Ok(())
    }

    #[test]
    fn test_output_shape_rules() -> Result<()> {
        let dev = CpuDevice;
        let unknown = Sequential::<CpuBackend>::new().add(wrap::<CpuBackend, _>(ReLU, &dev));
        assert_eq!(unknown.output_shape()?, None);

        let empty = Sequential::<CpuBackend>::new().with_input_shape(vec![None, Some(3usize)]);
        assert_eq!(empty.output_shape()?, empty.input_shape());

        let fc = wrap(Linear::<CpuBackend>::new(3, 5, true, DType::F32, &dev)?, &dev)
            .with_input_shape(vec![None, Some(3usize)]);
        let seq = Sequential::new()
            .with_input_shape(vec![None, Some(3usize)])
            .add(fc);
        assert_eq!(seq.output_shape()?, Some(IoShape::from(vec![None, Some(5usize)])));
        Ok(())
    }

    #[test]
    fn test_names_and_duplicates() -> Result<()> {
        let dev = CpuDevice;
        let fc = wrap(Linear::<CpuBackend>::new(2, 2, true, DType::F32, &dev)?, &dev);
        let seq = Sequential::new()
            .add_named("fc", fc)?
            .add(wrap::<CpuBackend, _>(ReLU, &dev));
        let names: Vec<&str> = seq.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["fc", "1"]);

        let keys: Vec<String> = seq.state_dict().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["fc.weight", "fc.bias"]);

        let dup = seq.add_named("fc", wrap::<CpuBackend, _>(ReLU, &dev));
        assert!(matches!(dup, Err(Error::DuplicateChild(ref n)) if n == "fc"));
        Ok(())
    }

    #[test]
    fn test_slice_shares_stages() -> Result<()> {
        let dev = CpuDevice;
        let fc = wrap(Linear::<CpuBackend>::new(4, 4, false, DType::F32, &dev)?, &dev)
            .with_input_shape(vec![None, Some(4usize)]);
        let seq = Sequential::new()
            .add(wrap::<CpuBackend, _>(ReLU, &dev).with_input_shape(vec![Some(9usize)]))
            .add(fc)
            .add(wrap::<CpuBackend, _>(ReLU, &dev));

        let tail = seq.slice(1..3)?;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.input_shape(), seq.get(1).and_then(|m| m.input_shape()));
        assert!(tail.params()[0].shares_storage(&seq.params()[0]));
        let keys: Vec<String> = tail.state_dict().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1.weight"]);

        assert!(seq.slice(2..5).is_err());
        assert!(seq.slice(0..0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_extra_inputs_reach_every_stage() -> Result<()> {
        let add_side = || {
            Lambda::<CpuBackend>::new(
                |xs: &[Value<CpuBackend>]| Ok(xs[0].as_tensor()?.add(xs[1].as_tensor()?)?.into()),
                &CpuDevice,
            )
        };
        let seq = Sequential::new().add(add_side()).add(add_side());
        let x = CpuTensor::zeros(2usize, DType::F32, &CpuDevice)?;
        let side = CpuTensor::ones(2usize, DType::F32, &CpuDevice)?;
        let out = seq.forward(&[x.into(), side.into()])?.into_tensor()?;
        assert_eq!(out.to_f64_vec()?, vec![2.0, 2.0]);
        assert!(Sequential::<CpuBackend>::new().forward(&[]).is_err());
        Ok(())
    }

    #[test]
    fn test_training_propagates() -> Result<()> {
        let dev = CpuDevice;
        let dropout = wrap::<CpuBackend, _>(crate::Dropout::new(0.5)?, &dev);
        let inner = Sequential::new().add(dropout);
        let outer = Sequential::new().add(inner);
        outer.eval();
        assert!(!outer.is_training());
        assert!(!outer.get(0).map_or(true, |m| m.is_training()));
        let x: Tensor<CpuBackend> = CpuTensor::ones(8usize, DType::F32, &dev)?;
        assert_eq!(outer.forward_tensor(&x)?.to_f64_vec()?, vec![1.0; 8]);
        Ok(())
    }
}
