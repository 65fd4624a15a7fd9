// Module trait — The capability contract every node in a model implements
//
// A model is a tree: leaves do arithmetic, composers (Sequential, Fork,
// Parallel, Shared) arrange other modules. Every node, leaf or composer,
// answers the same questions:
//
//   forward()        — compute outputs from positional inputs
//   input_shape()    — the shape it was declared to consume (if any)
//   output_shape()   — the shape it produces, possibly by running itself
//                      on a scratch input (see probe.rs)
//   children()       — ordered, named sub-modules
//   params()         — every registered parameter and buffer
//   trainable()      — parameters whose gradient flag is set
//   regularizable()  — weights subject to weight decay
//   save() / load()  — persist the name → array state mapping
//
// NAMES AND ORDER:
//
// Parameters and buffers are addressed by dotted paths built from child
// names, e.g. "0.weight" or "block.1.running_mean". Enumeration is always
// own entries first, then each child in insertion order. That order is the
// state mapping order, and it is what gets written to disk.
//
// GENERIC OVER BACKEND:
//
// All modules are generic over B: Backend, so the same model definition
// runs on any engine that implements the backend contract.

use std::path::Path;

use mosaic_core::backend::Backend;
use mosaic_core::dynamic_shape::IoShape;
use mosaic_core::error::{Error, Result};
use mosaic_core::tensor::Tensor;

use crate::value::Value;

/// The fundamental trait for every node of a model.
///
/// Only `forward` is required. A leaf that holds parameters overrides
/// `own_parameters`; a composer overrides `children`; everything else is
/// derived from those two.
///
/// # Example
/// ```ignore
/// struct Double;
///
/// impl<B: Backend> Module<B> for Double {
///     fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>> {
///         let x = inputs[0].as_tensor()?;
///         Ok(x.affine(2.0, 0.0)?.into())
///     }
///     fn output_shape(&self) -> Result<Option<IoShape>> {
///         Ok(None)
///     }
/// }
/// ```
pub trait Module<B: Backend> {
    /// Compute the output from positional inputs.
    fn forward(&self, inputs: &[Value<B>]) -> Result<Value<B>>;

    /// Short type name, used in error messages and `describe`.
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }

    /// The declared input shape; `None` when unknown.
    fn input_shape(&self) -> Option<IoShape> {
        None
    }

    /// The shape this module produces.
    ///
    /// `Ok(None)` means unknown. Types with no shape rule fail with
    /// `Error::NotImplemented`.
    fn output_shape(&self) -> Result<Option<IoShape>> {
        Err(Error::NotImplemented {
            op: "output_shape",
            module: self.name(),
        })
    }

    /// Direct sub-modules with their names, in insertion order.
    fn children(&self) -> Vec<(String, &dyn Module<B>)> {
        Vec::new()
    }

    /// Parameters registered directly on this module (not its children).
    fn own_parameters(&self) -> Vec<(String, Tensor<B>)> {
        Vec::new()
    }

    /// Non-parameter state registered directly on this module, e.g. running
    /// statistics.
    fn own_buffers(&self) -> Vec<(String, Tensor<B>)> {
        Vec::new()
    }

    /// Every parameter in the tree, with dotted names.
    fn named_parameters(&self) -> Vec<(String, Tensor<B>)> {
        let mut named = self.own_parameters();
        for (child_name, child) in self.children() {
            for (k, v) in child.named_parameters() {
                named.push((format!("{child_name}.{k}"), v));
            }
        }
        named
    }

    /// Every buffer in the tree, with dotted names.
    fn named_buffers(&self) -> Vec<(String, Tensor<B>)> {
        let mut named = self.own_buffers();
        for (child_name, child) in self.children() {
            for (k, v) in child.named_buffers() {
                named.push((format!("{child_name}.{k}"), v));
            }
        }
        named
    }

    /// The ordered name → tensor mapping that `save` writes and `load`
    /// restores: own parameters, own buffers, then each child's mapping.
    fn state_dict(&self) -> Vec<(String, Tensor<B>)> {
        let mut state = self.own_parameters();
        state.extend(self.own_buffers());
        for (child_name, child) in self.children() {
            for (k, v) in child.state_dict() {
                state.push((format!("{child_name}.{k}"), v));
            }
        }
        state
    }

    /// Every parameter and buffer, in state mapping order.
    fn params(&self) -> Vec<Tensor<B>> {
        self.state_dict().into_iter().map(|(_, t)| t).collect()
    }

    /// Parameters (not buffers) that track gradients.
    fn trainable(&self) -> Vec<Tensor<B>> {
        self.named_parameters()
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| t.is_variable())
            .collect()
    }

    /// Parameters subject to weight decay: this module's own "weight" if it
    /// tracks gradients, then each child's regularizable set in order.
    /// Biases are never included.
    fn regularizable(&self) -> Vec<Tensor<B>> {
        let mut out: Vec<Tensor<B>> = self
            .own_parameters()
            .into_iter()
            .filter(|(name, t)| name == "weight" && t.is_variable())
            .map(|(_, t)| t)
            .collect();
        for (_, child) in self.children() {
            out.extend(child.regularizable());
        }
        out
    }

    /// Write the state mapping to a safetensors file.
    fn save(&self, path: &Path) -> Result<()> {
        let state = self.state_dict();
        crate::safetensors::save_state(&state, path)?;
        log::info!(
            "saved {} state entries of {} to {}",
            state.len(),
            self.name(),
            path.display()
        );
        Ok(())
    }

    /// Restore the state mapping from a safetensors file written by `save`.
    ///
    /// Every name and shape is checked before anything is written, so a
    /// mismatching file leaves the module untouched. With `eval`, the whole
    /// tree is switched to inference mode afterwards.
    fn load(&self, path: &Path, eval: bool) -> Result<()> {
        let state = self.state_dict();
        crate::safetensors::load_state(&state, path)?;
        if eval {
            self.eval();
        }
        log::info!(
            "loaded {} state entries into {} from {}",
            state.len(),
            self.name(),
            path.display()
        );
        Ok(())
    }

    /// Re-initialize parameters. Default is a no-op.
    fn reset_parameters(&self) -> Result<()> {
        Ok(())
    }

    /// Set training or evaluation mode on this module and all children.
    ///
    /// Modules that behave differently in the two modes (Dropout, BatchNorm)
    /// keep the flag in a `Cell<bool>` so `&self` suffices.
    fn set_training(&self, training: bool) {
        for (_, child) in self.children() {
            child.set_training(training);
        }
    }

    /// Whether the module is in training mode (default: true).
    fn is_training(&self) -> bool {
        true
    }

    /// Convenience: set training mode.
    fn train(&self) {
        self.set_training(true);
    }

    /// Convenience: set evaluation mode.
    fn eval(&self) {
        self.set_training(false);
    }

    /// Total number of scalar parameters in the tree.
    fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, p)| p.elem_count())
            .sum()
    }

    /// Single tensor in, single tensor out.
    fn forward_tensor(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        self.forward(&[Value::Tensor(x.clone())])?.into_tensor()
    }
}

/// `mosaic_nn::linear::Linear<mosaic_cpu::CpuBackend>` → `Linear`.
pub(crate) fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Render a module tree, one node per line:
///
/// ```text
/// Sequential(input_shape=[?, 4])
///   (0): Linear(input_shape=[?, 4])
///   (1): ReLU(input_shape=None)
/// ```
pub fn describe<B: Backend>(module: &dyn Module<B>) -> String {
    let mut out = String::new();
    describe_into(module, 0, &mut out);
    out
}

fn describe_into<B: Backend>(module: &dyn Module<B>, depth: usize, out: &mut String) {
    let shape = match module.input_shape() {
        Some(s) => s.to_string(),
        None => "None".to_string(),
    };
    out.push_str(&format!("{}(input_shape={shape})\n", module.name()));
    for (name, child) in module.children() {
        out.push_str(&"  ".repeat(depth + 1));
        out.push_str(&format!("({name}): "));
        describe_into(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::DType;
    use mosaic_cpu::{CpuBackend, CpuDevice, CpuTensor};

    /// A leaf authored without any shape logic.
    struct Plain {
        weight: CpuTensor,
        bias: CpuTensor,
    }

    impl Module<CpuBackend> for Plain {
        fn forward(&self, inputs: &[Value<CpuBackend>]) -> Result<Value<CpuBackend>> {
            Ok(inputs[0].as_tensor()?.mul(&self.weight)?.add(&self.bias)?.into())
        }

        fn own_parameters(&self) -> Vec<(String, CpuTensor)> {
            vec![
                ("weight".to_string(), self.weight.clone()),
                ("bias".to_string(), self.bias.clone()),
            ]
        }
    }

    fn plain() -> Result<Plain> {
        Ok(Plain {
            weight: CpuTensor::ones(3usize, DType::F32, &CpuDevice)?.set_variable(),
            bias: CpuTensor::zeros(3usize, DType::F32, &CpuDevice)?.set_variable(),
        })
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(
            short_type_name("mosaic_nn::linear::Linear<mosaic_cpu::CpuBackend>"),
            "Linear"
        );
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_missing_shape_rule() -> Result<()> {
        let m = plain()?;
        assert_eq!(m.input_shape(), None);
        match m.output_shape() {
            Err(Error::NotImplemented { op, module }) => {
                assert_eq!(op, "output_shape");
                assert_eq!(module, "Plain");
            }
            other => panic!("expected NotImplemented, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_default_views() -> Result<()> {
        let m = plain()?;
        assert_eq!(m.params().len(), 2);
        assert_eq!(m.trainable().len(), 2);

        let reg = m.regularizable();
        assert_eq!(reg.len(), 1);
        assert!(reg[0].shares_storage(&m.weight));

        m.weight.set_requires_grad(false);
        assert!(m.regularizable().is_empty());
        assert_eq!(m.trainable().len(), 1);
        assert_eq!(m.num_parameters(), 6);
        Ok(())
    }

    #[test]
    fn test_forward_tensor() -> Result<()> {
        let m = plain()?;
        let x = CpuTensor::full(3usize, 2.0, DType::F32, &CpuDevice)?;
        let y = m.forward_tensor(&x)?;
        assert_eq!(y.to_f64_vec()?, vec![2.0, 2.0, 2.0]);
        Ok(())
    }
}
