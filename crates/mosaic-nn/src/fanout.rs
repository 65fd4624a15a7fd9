// Fan-out composers — One module per branch, one result per branch
//
//   Fork      — every branch sees the same inputs:
//                 Fork[m1, m2].forward(x)       == (m1(x), m2(x))
//   Parallel  — each branch consumes its own positional input:
//                 Parallel[m1, m2].forward(x, y) == (m1(x), m2(y))
//
// A branch is either a module or a constant tensor. Constants become a
// Lambda that ignores its inputs; in Parallel they consume no input.
// Children are named "module{i}" / "tensor{i}" by position.
//
// SHAPES:
//
// The declared input shape of a fan-out node is the tuple of its branches'
// output shapes, fixed at construction. The output shape is the same tuple.
//
// VIEWS:
//
// A fan-out node reports empty `params`, `trainable` and `regularizable`
// at its own level; the branches are queried directly for theirs. The
// state mapping (and therefore save/load) still covers every branch.

use std::cell::Cell;

use mosaic_core::backend::Backend;
use mosaic_core::dynamic_shape::IoShape;
use mosaic_core::error::{Error, Result};
use mosaic_core::tensor::Tensor;

use crate::lambda::Lambda;
use crate::module::Module;
use crate::value::Value;

/// One item of a fan-out node: a module, or a constant tensor.
pub enum Branch<B: Backend> {
    Module(Box<dyn Module<B>>),
    Constant(Tensor<B>),
}

impl<B: Backend> Branch<B> {
    pub fn module<M: Module<B> + 'static>(module: M) -> Self {
        Branch::Module(Box::new(module))
    }

    pub fn constant(value: Tensor<B>) -> Self {
        Branch::Constant(value)
    }
}

impl<B: Backend> From<Tensor<B>> for Branch<B> {
    fn from(value: Tensor<B>) -> Self {
        Branch::Constant(value)
    }
}

/// A module's output shape, with "no shape rule" read as unknown.
pub(crate) fn output_shape_or_unknown<B: Backend>(
    module: &dyn Module<B>,
) -> Result<Option<IoShape>> {
    match module.output_shape() {
        Err(Error::NotImplemented { .. }) => Ok(None),
        other => other,
    }
}

struct Child<B: Backend> {
    name: String,
    module: Box<dyn Module<B>>,
    constant: bool,
}

/// Runs every branch on the same inputs and returns their results as a
/// tuple, in construction order.
pub struct Fork<B: Backend> {
    children: Vec<Child<B>>,
    shape: IoShape,
    training: Cell<bool>,
}

impl<B: Backend> Fork<B> {
    pub fn new(branches: Vec<Branch<B>>) -> Result<Self> {
        let mut children = Vec::with_capacity(branches.len());
        let mut shapes = Vec::with_capacity(branches.len());
        for (i, branch) in branches.into_iter().enumerate() {
            let child = match branch {
                Branch::Module(module) => Child {
                    name: format!("module{i}"),
                    module,
                    constant: false,
                },
                Branch::Constant(value) => Child {
                    name: format!("tensor{i}"),
                    module: Box::new(Lambda::constant(value)),
                    constant: true,
                },
            };
            shapes.push(output_shape_or_unknown(child.module.as_ref())?);
            children.push(child);
        }
        let shape = IoShape::Tuple(shapes);
        log::debug!("built fan-out over {} branches: {}", children.len(), shape);
        Ok(Fork {
            children,
            shape,
            training: Cell::new(true),
        })
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The branch at `index`; constants appear as their Lambda.
    pub fn branch(&self, index: usize) -> Option<&dyn Module<B>> {
        self.children.get(index).map(|c| c.module.as_ref())
    }

    /// Number of branches that consume an input (non-constant ones).
    fn consumers(&self) -> usize {
        self.children.iter().filter(|c| !c.constant).count()
    }
}

impl<B: Backend> Module<B> for Fork<B> {
    fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>> {
        let outputs = self
            .children
            .iter()
            .map(|c| c.module.forward(inputs))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Tuple(outputs))
    }

    fn input_shape(&self) -> Option<IoShape> {
        Some(self.shape.clone())
    }

    fn output_shape(&self) -> Result<Option<IoShape>> {
        Ok(Some(self.shape.clone()))
    }

    fn children(&self) -> Vec<(String, &dyn Module<B>)> {
        self.children
            .iter()
            .map(|c| (c.name.clone(), c.module.as_ref()))
            .collect()
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
        for c in &self.children {
            c.module.set_training(training);
        }
    }

    fn is_training(&self) -> bool {
        self.training.get()
    }
}

/// Feeds one positional input to each non-constant branch, in order.
/// Constant branches take no input.
pub struct Parallel<B: Backend> {
    fork: Fork<B>,
}

impl<B: Backend> Parallel<B> {
    pub fn new(branches: Vec<Branch<B>>) -> Result<Self> {
        Ok(Parallel {
            fork: Fork::new(branches)?,
        })
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.fork.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fork.is_empty()
    }

    pub fn branch(&self, index: usize) -> Option<&dyn Module<B>> {
        self.fork.branch(index)
    }
}

impl<B: Backend> Module<B> for Parallel<B> {
    fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>> {
        let needed = self.fork.consumers();
        if inputs.len() < needed {
            return Err(Error::MissingInput {
                module: self.name(),
                expected: needed,
                got: inputs.len(),
            });
        }
        if inputs.len() > needed {
            log::warn!(
                "{} ignores {} surplus input(s)",
                self.name(),
                inputs.len() - needed
            );
        }

        let mut next = inputs.iter();
        let mut outputs = Vec::with_capacity(self.fork.len());
        for c in &self.fork.children {
            let out = if c.constant {
                c.module.forward(&[])?
            } else {
                let x = next.next().ok_or_else(|| Error::MissingInput {
                    module: self.name(),
                    expected: needed,
                    got: inputs.len(),
                })?;
                c.module.forward(std::slice::from_ref(x))?
            };
            outputs.push(out);
        }
        Ok(Value::Tuple(outputs))
    }

    fn input_shape(&self) -> Option<IoShape> {
        self.fork.input_shape()
    }

    fn output_shape(&self) -> Result<Option<IoShape>> {
        self.fork.output_shape()
    }

    fn children(&self) -> Vec<(String, &dyn Module<B>)> {
        self.fork.children()
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
        self.fork.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.fork.is_training()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrapper::wrap;
    use crate::Linear;
    use mosaic_core::DType;
    use mosaic_cpu::{CpuBackend, CpuDevice, CpuTensor};

    fn scale(k: f64) -> Lambda<CpuBackend> {
        Lambda::<CpuBackend>::bind(
            |xs: &[Value<CpuBackend>], k: &f64| Ok(xs[0].as_tensor()?.affine(*k, 0.0)?.into()),
            k,
            &CpuDevice,
        )
        .with_input_shape(vec![None, Some(2usize)])
    }

    fn values(v: &Value<CpuBackend>) -> Result<Vec<f64>> {
        v.as_tensor()?.to_f64_vec()
    }

    #[test]
    fn test_fork_same_input() -> Result<()> {
        let fork = Fork::new(vec![Branch::module(scale(2.0)), Branch::module(scale(3.0))])?;
        let x = CpuTensor::ones((1, 2), DType::F64, &CpuDevice)?;
        let out = fork.forward(&[x.into()])?.into_tuple()?;
        assert_eq!(out.len(), 2);
        assert_eq!(values(&out[0])?, vec![2.0, 2.0]);
        assert_eq!(values(&out[1])?, vec![3.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_fork_shapes_and_names() -> Result<()> {
        let c = CpuTensor::zeros((4, 4), DType::F32, &CpuDevice)?;
        let fork = Fork::new(vec![Branch::module(scale(1.0)), c.into()])?;
        let expected = IoShape::Tuple(vec![
            Some(vec![None, Some(2usize)].into()),
            Some(vec![4usize, 4].into()),
        ]);
        assert_eq!(fork.input_shape(), Some(expected.clone()));
        assert_eq!(fork.output_shape()?, Some(expected));

        let names: Vec<String> = fork.children().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["module0", "tensor1"]);
        Ok(())
    }

    #[test]
    fn test_parallel_distinct_inputs() -> Result<()> {
        let c = CpuTensor::full(1usize, 9.0, DType::F64, &CpuDevice)?;
        let par = Parallel::new(vec![
            Branch::module(scale(2.0)),
            Branch::constant(c),
            Branch::module(scale(3.0)),
        ])?;
        let x = CpuTensor::ones((1, 2), DType::F64, &CpuDevice)?;
        let y = CpuTensor::full((1, 2), 2.0, DType::F64, &CpuDevice)?;
        let out = par.forward(&[x.clone().into(), y.clone().into()])?.into_tuple()?;
        assert_eq!(values(&out[0])?, vec![2.0, 2.0]);
        assert_eq!(values(&out[1])?, vec![9.0]);
        assert_eq!(values(&out[2])?, vec![6.0, 6.0]);

        match par.forward(&[x.clone().into()]) {
            Err(Error::MissingInput { expected, got, .. }) => {
                assert_eq!((expected, got), (2, 1));
            }
            other => panic!("expected MissingInput, got {other:?}"),
        }

        // Surplus inputs are ignored.
        let out = par.forward(&[x.clone().into(), y.into(), x.into()])?.into_tuple()?;
        assert_eq!(out.len(), 3);
        Ok(())
    }

    #[test]
    fn test_fan_out_views_are_empty() -> Result<()> {
        let dev = CpuDevice;
        let fc = wrap(Linear::<CpuBackend>::new(2, 2, true, DType::F32, &dev)?, &dev);
        let fork = Fork::new(vec![Branch::module(fc)])?;
        assert!(fork.params().is_empty());
        assert!(fork.trainable().is_empty());
        assert!(fork.regularizable().is_empty());
        assert_eq!(fork.branch(0).map(|b| b.params().len()), Some(2));

        let keys: Vec<String> = fork.state_dict().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["module0.weight", "module0.bias"]);
        Ok(())
    }

    /// Identity with no shape rule at all.
    struct NoRule;

    impl Module<CpuBackend> for NoRule {
        fn forward(&self, inputs: &[Value<CpuBackend>]) -> Result<Value<CpuBackend>> {
            Ok(inputs[0].clone())
        }
    }

    #[test]
    fn test_branch_without_shape_rule_is_unknown() -> Result<()> {
        let par = Parallel::new(vec![Branch::module(NoRule), Branch::module(scale(1.0))])?;
        assert_eq!(
            par.input_shape(),
            Some(IoShape::Tuple(vec![None, Some(vec![None, Some(2usize)].into())]))
        );
        Ok(())
    }
}
