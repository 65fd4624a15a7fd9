// ShapeProbe — Output shape inference by execution
//
// A module that declares its input shape but has no closed-form shape rule
// can still report its output shape: build a scratch input of the declared
// shape, run the module once, and read the shape of what comes out.
//
// PROCEDURE:
//
//   1. A declared output shape wins; it is returned verbatim, nothing runs.
//   2. No declared input shape → the output shape is unknown (None).
//   3. Otherwise concretize the input: every dynamic dim becomes 1, and a
//      zero-filled tensor of that shape is allocated on the probe's device
//      with the probe's dtype. A tuple input shape becomes one positional
//      scratch input per entry; an unknown entry makes the result unknown.
//   4. Run the module in inference mode, then restore the mode of every
//      module in the tree one by one (a child may have been in a different
//      mode than its parent). This keeps the probe from touching persisted
//      state such as BatchNorm running statistics.
//   5. Mark every index that was dynamic in the input as dynamic in the
//      output and return it. A tuple input whose entries disagree on the
//      dynamic positions, such as `([?, 4], [4, ?])`, gives an unknown
//      output: no mark would be right for every entry.
//
// Step 5 assumes input dim k corresponds to output dim k. Modules that move
// the batch axis (transposes, flattening across it) report a misplaced
// dynamic marker; declare their output shape explicitly instead.
//
// The device and dtype are explicit configuration; nothing is guessed from
// the module's parameters.

use mosaic_core::backend::Backend;
use mosaic_core::dtype::DType;
use mosaic_core::dynamic_shape::IoShape;
use mosaic_core::error::Result;
use mosaic_core::tensor::Tensor;

use crate::module::Module;
use crate::value::Value;

/// Runs modules on scratch inputs to discover their output shape.
#[derive(Debug, Clone)]
pub struct ShapeProbe<B: Backend> {
    device: B::Device,
    dtype: DType,
}

impl<B: Backend> ShapeProbe<B> {
    /// Probe on `device` with F32 scratch inputs.
    pub fn new(device: &B::Device) -> Self {
        ShapeProbe {
            device: device.clone(),
            dtype: DType::F32,
        }
    }

    /// Use `dtype` for scratch inputs.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Infer `module`'s output shape from its declared input shape.
    pub fn infer(
        &self,
        module: &dyn Module<B>,
        declared_output: Option<&IoShape>,
    ) -> Result<Option<IoShape>> {
        if let Some(shape) = declared_output {
            return Ok(Some(shape.clone()));
        }
        let Some(input_shape) = module.input_shape() else {
            return Ok(None);
        };
        let Some(dynamic) = input_shape.dynamic_indices() else {
            log::debug!(
                "{}: tuple input {} has mismatched dynamic dims, output unknown",
                module.name(),
                input_shape
            );
            return Ok(None);
        };

        let inputs = match &input_shape {
            IoShape::Tensor(_) => match self.scratch(&input_shape)? {
                Some(v) => vec![v],
                None => return Ok(None),
            },
            IoShape::Tuple(items) => {
                let mut inputs = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_ref().map(|s| self.scratch(s)).transpose()?.flatten() {
                        Some(v) => inputs.push(v),
                        None => return Ok(None),
                    }
                }
                inputs
            }
        };

        let mut modes = Vec::new();
        snapshot_modes(module, &mut modes);
        module.set_training(false);
        let result = module.forward(&inputs);
        restore_modes(module, &mut modes.into_iter());

        let observed = result?.shape();
        log::debug!(
            "probed {} with input {}: observed {}, dynamic dims {:?}",
            module.name(),
            input_shape,
            observed,
            dynamic
        );
        Ok(Some(observed.mark_dynamic(&dynamic)))
    }

    /// A zero-filled value of `shape` with dynamic dims set to 1; `None`
    /// if any part of the shape is unknown.
    fn scratch(&self, shape: &IoShape) -> Result<Option<Value<B>>> {
        match shape {
            IoShape::Tensor(s) => {
                let t = Tensor::<B>::zeros(s.concretize(1), self.dtype, &self.device)?;
                Ok(Some(Value::Tensor(t)))
            }
            IoShape::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_ref().map(|s| self.scratch(s)).transpose()?.flatten() {
                        Some(v) => values.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::Tuple(values)))
            }
        }
    }
}

/// Training flags of `module` and its descendants, in pre-order.
fn snapshot_modes<B: Backend>(module: &dyn Module<B>, out: &mut Vec<bool>) {
    out.push(module.is_training());
    for (_, child) in module.children() {
        snapshot_modes(child, out);
    }
}

/// Parents first: their `set_training` propagates down and the children's
/// own flags are then put back on top.
fn restore_modes<B: Backend>(
    module: &dyn Module<B>,
    modes: &mut impl Iterator<Item = bool>,
) {
    if let Some(training) = modes.next() {
        module.set_training(training);
    }
    for (_, child) in module.children() {
        restore_modes(child, modes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{wrap, Dropout, Lambda, Sequential};
    use mosaic_core::dynamic_shape::DynShape;
    use mosaic_cpu::{CpuBackend, CpuDevice};
    use std::cell::Cell;

    /// Doubles the last dimension by concatenating the input with itself,
    /// and counts how often it ran in training mode.
    struct Widen {
        input_shape: Option<IoShape>,
        training: Cell<bool>,
        train_calls: Cell<usize>,
    }

    impl Widen {
        fn new(input_shape: Option<IoShape>) -> Self {
            Widen {
                input_shape,
                training: Cell::new(true),
                train_calls: Cell::new(0),
            }
        }
    }

    impl Module<CpuBackend> for Widen {
        fn forward(&self, inputs: &[Value<CpuBackend>]) -> Result<Value<CpuBackend>> {
            if self.training.get() {
                self.train_calls.set(self.train_calls.get() + 1);
            }
            let x = inputs[0].as_tensor()?;
            Ok(Tensor::cat(&[x.clone(), x.clone()], x.rank() - 1)?.into())
        }
        fn input_shape(&self) -> Option<IoShape> {
            self.input_shape.clone()
        }
        fn set_training(&self, training: bool) {
            self.training.set(training);
        }
        fn is_training(&self) -> bool {
            self.training.get()
        }
    }

    #[test]
    fn test_dynamic_dim_is_preserved() -> Result<()> {
        let m = Widen::new(Some(vec![None, Some(3)].into()));
        let probe = ShapeProbe::<CpuBackend>::new(&CpuDevice);
        let out = probe.infer(&m, None)?;
        assert_eq!(out, Some(IoShape::from(vec![None, Some(6)])));
        Ok(())
    }

    #[test]
    fn test_declared_output_wins() -> Result<()> {
        let m = Widen::new(None);
        let probe = ShapeProbe::<CpuBackend>::new(&CpuDevice);
        let declared = IoShape::from(vec![7usize, 7]);
        assert_eq!(probe.infer(&m, Some(&declared))?, Some(declared));
        assert_eq!(m.train_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn test_unknown_input_is_unknown_output() -> Result<()> {
        let m = Widen::new(None);
        let probe = ShapeProbe::<CpuBackend>::new(&CpuDevice);
        assert_eq!(probe.infer(&m, None)?, None);

        let partial = Widen::new(Some(IoShape::Tuple(vec![
            Some(vec![2usize].into()),
            None,
        ])));
        assert_eq!(probe.infer(&partial, None)?, None);
        Ok(())
    }

    #[test]
    fn test_probe_runs_in_eval_and_restores_mode() -> Result<()> {
        let m = Widen::new(Some(IoShape::Tensor(DynShape::from(vec![2usize, 2]))));
        let probe = ShapeProbe::<CpuBackend>::new(&CpuDevice).with_dtype(DType::F64);
        probe.infer(&m, None)?;
        assert_eq!(m.train_calls.get(), 0);
        assert!(m.is_training());

        m.set_training(false);
        probe.infer(&m, None)?;
        assert!(!m.is_training());
        Ok(())
    }

    #[test]
    fn test_tuple_input_needs_agreeing_dynamic_dims() -> Result<()> {
        let first = Lambda::<CpuBackend>::new(
            |xs: &[Value<CpuBackend>]| Ok(xs[0].clone()),
            &CpuDevice,
        );
        let probe = ShapeProbe::<CpuBackend>::new(&CpuDevice);

        let m = first.with_input_shape(IoShape::Tuple(vec![
            Some(vec![None, Some(4usize)].into()),
            Some(vec![Some(4usize), None].into()),
        ]));
        assert_eq!(probe.infer(&m, None)?, None);

        let m = m.with_input_shape(IoShape::Tuple(vec![
            Some(vec![None, Some(4usize)].into()),
            Some(vec![None, Some(2usize)].into()),
        ]));
        assert_eq!(probe.infer(&m, None)?, Some(IoShape::from(vec![None, Some(4usize)])));
        Ok(())
    }

    #[test]
    fn test_composer_probe_keeps_child_modes() -> Result<()> {
        let model = Sequential::<CpuBackend>::new()
            .with_input_shape(vec![None, Some(3usize)])
            .add(wrap::<CpuBackend, _>(Dropout::new(0.5)?, &CpuDevice))
            .add(wrap::<CpuBackend, _>(Dropout::new(0.5)?, &CpuDevice));
        if let Some(first) = model.get(0) {
            first.eval();
        }
        let probe = ShapeProbe::<CpuBackend>::new(&CpuDevice);
        assert_eq!(
            probe.infer(&model, None)?,
            Some(IoShape::from(vec![None, Some(3usize)]))
        );
        assert!(model.is_training());
        let modes: Vec<bool> = model.iter().map(|(_, m)| m.is_training()).collect();
        assert_eq!(modes, vec![false, true]);
        Ok(())
    }
}
