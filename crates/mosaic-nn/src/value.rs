// Value — What flows between modules
//
// Most modules map one tensor to one tensor, but fan-out composers return
// one result per branch and fan-in composers take several inputs. A Value
// is therefore either a single tensor or an ordered tuple of Values.
//
// Positional inputs are passed as `&[Value<B>]`; a tuple Value is one
// positional input that happens to be structured.

use mosaic_core::backend::Backend;
use mosaic_core::dynamic_shape::{DynShape, IoShape};
use mosaic_core::error::{Error, Result};
use mosaic_core::tensor::Tensor;

/// A tensor, or an ordered tuple of values.
#[derive(Debug, Clone)]
pub enum Value<B: Backend> {
    Tensor(Tensor<B>),
    Tuple(Vec<Value<B>>),
}

impl<B: Backend> Value<B> {
    /// "tensor" or "tuple", for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Tuple(_) => "tuple",
        }
    }

    pub fn as_tensor(&self) -> Result<&Tensor<B>> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(Error::ValueKind {
                expected: "tensor",
                got: other.kind(),
            }),
        }
    }

    pub fn into_tensor(self) -> Result<Tensor<B>> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(Error::ValueKind {
                expected: "tensor",
                got: other.kind(),
            }),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Value<B>]> {
        match self {
            Value::Tuple(items) => Ok(items),
            other => Err(Error::ValueKind {
                expected: "tuple",
                got: other.kind(),
            }),
        }
    }

    pub fn into_tuple(self) -> Result<Vec<Value<B>>> {
        match self {
            Value::Tuple(items) => Ok(items),
            other => Err(Error::ValueKind {
                expected: "tuple",
                got: other.kind(),
            }),
        }
    }

    /// The observed shape of this value (every dimension fixed).
    pub fn shape(&self) -> IoShape {
        match self {
            Value::Tensor(t) => IoShape::Tensor(DynShape::from_shape(t.shape())),
            Value::Tuple(items) => {
                IoShape::Tuple(items.iter().map(|v| Some(v.shape())).collect())
            }
        }
    }
}

impl<B: Backend> From<Tensor<B>> for Value<B> {
    fn from(t: Tensor<B>) -> Self {
        Value::Tensor(t)
    }
}

impl<B: Backend> From<Vec<Value<B>>> for Value<B> {
    fn from(items: Vec<Value<B>>) -> Self {
        Value::Tuple(items)
    }
}

impl<B: Backend> From<Vec<Tensor<B>>> for Value<B> {
    fn from(items: Vec<Tensor<B>>) -> Self {
        Value::Tuple(items.into_iter().map(Value::Tensor).collect())
    }
}

/// The single tensor at the front of a positional input list.
pub(crate) fn first_tensor<'a, B: Backend>(
    inputs: &'a [Value<B>],
    module: &str,
) -> Result<&'a Tensor<B>> {
    inputs
        .first()
        .ok_or_else(|| Error::MissingInput {
            module: module.to_string(),
            expected: 1,
            got: 0,
        })?
        .as_tensor()
}
