use crate::shape::Shape;

/// All errors that can occur within mosaic.
///
/// One enum covers the tensor engine and the composition layer alike:
/// shape and dtype mismatches, value-kind mismatches at module boundaries,
/// missing shape rules, and state-mapping (save/load) failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors (e.g., trying to add [2,3] + [4,5]).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// DType mismatch between tensors in a binary operation.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Tried to access a scalar from a non-scalar tensor.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Matrix multiplication dimension mismatch.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// A module was asked for something its type provides no rule for,
    /// e.g. `output_shape` on a leaf authored without shape logic.
    #[error("{op} is not implemented for {module}")]
    NotImplemented { op: &'static str, module: String },

    /// A composer received fewer positional inputs than it consumes.
    #[error("{module} expects at least {expected} input(s), got {got}")]
    MissingInput {
        module: String,
        expected: usize,
        got: usize,
    },

    /// A value flowing between modules had the wrong structure.
    #[error("expected a {expected} value, got a {got}")]
    ValueKind {
        expected: &'static str,
        got: &'static str,
    },

    /// Two children of one composer were registered under the same name.
    #[error("duplicate child name '{0}'")]
    DuplicateChild(String),

    /// A state entry the module owns is absent from the persisted mapping.
    #[error("missing key '{0}' in state mapping")]
    MissingKey(String),

    /// The persisted mapping holds an entry the module does not own.
    #[error("unexpected key '{0}' in state mapping")]
    UnexpectedKey(String),

    /// A persisted array does not have the shape of the entry it restores.
    #[error("shape mismatch for '{name}': module has {expected}, state has {got}")]
    StateShapeMismatch {
        name: String,
        expected: Shape,
        got: Shape,
    },

    /// File system failure while reading or writing a state mapping.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A persisted mapping could not be encoded or decoded.
    #[error("format error: {0}")]
    Format(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create a format error from anything displayable (foreign codec errors).
    pub fn format(e: impl std::fmt::Display) -> Self {
        Error::Format(e.to_string())
    }
}

/// Convenience Result type used throughout mosaic.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
