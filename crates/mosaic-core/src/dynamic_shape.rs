// Dynamic Shapes — Declared shapes with unknown dimensions
//
// A module declares the shape it expects before any data exists. Some
// dimensions are not fixed at that point, most often the batch axis:
//
//   [?, 3, 32, 32]   — any batch of 3x32x32 images
//
// COMPONENTS:
//
//   Dim      — one declared dimension: Fixed(n) or Dynamic
//   DynShape — an ordered list of Dims
//   IoShape  — what a module consumes or produces: a single tensor shape,
//              or a tuple of them (fan-out composers), where any tuple
//              entry may itself be unknown
//
// An unknown shape is `Option::<IoShape>::None`. It is a different thing
// from the zero-length shape `[]`, which is a known scalar shape.
//
// To run a module on synthetic input, a DynShape is concretized (dynamic
// dims become a placeholder size), the module executes, and the dynamic
// positions are re-marked on the observed output with `mark_dynamic`.

use std::fmt;

use crate::shape::Shape;

/// A declared dimension: a concrete size or the dynamic marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Known at construction time: 3, 768, etc.
    Fixed(usize),
    /// Not fixed until runtime; typically the batch axis.
    Dynamic,
}

impl Dim {
    /// Is this the dynamic marker?
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dim::Dynamic)
    }

    /// The concrete size, if any.
    pub fn size(&self) -> Option<usize> {
        match self {
            Dim::Fixed(n) => Some(*n),
            Dim::Dynamic => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Fixed(n)
    }
}

impl From<Option<usize>> for Dim {
    fn from(n: Option<usize>) -> Self {
        n.map_or(Dim::Dynamic, Dim::Fixed)
    }
}

/// A declared tensor shape that may contain dynamic dimensions.
///
/// # Examples
/// ```ignore
/// let s = DynShape::from(vec![None, Some(3)]); // [?, 3]
/// assert_eq!(s.dynamic_indices(), vec![0]);
/// assert_eq!(s.concretize(1), Shape::from((1, 3)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DynShape {
    dims: Vec<Dim>,
}

impl DynShape {
    /// Create a new declared shape.
    pub fn new(dims: Vec<Dim>) -> Self {
        Self { dims }
    }

    /// Create a fully-fixed declared shape from a concrete shape.
    pub fn from_shape(shape: &Shape) -> Self {
        Self {
            dims: shape.dims().iter().map(|&d| Dim::Fixed(d)).collect(),
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// Positions holding the dynamic marker, in ascending order.
    pub fn dynamic_indices(&self) -> Vec<usize> {
        self.dims
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_dynamic())
            .map(|(i, _)| i)
            .collect()
    }

    /// Replace every dynamic dimension with `fill`.
    pub fn concretize(&self, fill: usize) -> Shape {
        Shape::new(self.dims.iter().map(|d| d.size().unwrap_or(fill)).collect())
    }

    /// Copy of this shape with the given positions set to dynamic.
    /// Positions beyond the rank are ignored.
    pub fn mark_dynamic(&self, indices: &[usize]) -> Self {
        let mut dims = self.dims.clone();
        for &i in indices {
            if let Some(d) = dims.get_mut(i) {
                *d = Dim::Dynamic;
            }
        }
        Self { dims }
    }
}

impl fmt::Display for DynShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<Dim>> for DynShape {
    fn from(dims: Vec<Dim>) -> Self {
        Self::new(dims)
    }
}

impl From<Vec<Option<usize>>> for DynShape {
    /// `None` entries become dynamic dimensions.
    fn from(dims: Vec<Option<usize>>) -> Self {
        Self::new(dims.into_iter().map(Dim::from).collect())
    }
}

impl From<Vec<usize>> for DynShape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims.into_iter().map(Dim::Fixed).collect())
    }
}

impl From<usize> for DynShape {
    /// A single integer declares a rank-1 shape.
    fn from(d: usize) -> Self {
        Self::new(vec![Dim::Fixed(d)])
    }
}

impl From<Shape> for DynShape {
    fn from(shape: Shape) -> Self {
        Self::from_shape(&shape)
    }
}

impl From<&Shape> for DynShape {
    fn from(shape: &Shape) -> Self {
        Self::from_shape(shape)
    }
}

// IoShape — The shape of what flows into or out of a module

/// Shape of a module's input or output: one tensor, or a tuple of entries
/// (each of which may be unknown).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IoShape {
    Tensor(DynShape),
    Tuple(Vec<Option<IoShape>>),
}

impl IoShape {
    /// The tensor shape, if this is not a tuple.
    pub fn as_tensor(&self) -> Option<&DynShape> {
        match self {
            IoShape::Tensor(s) => Some(s),
            IoShape::Tuple(_) => None,
        }
    }

    /// The tuple entries, if this is a tuple.
    pub fn as_tuple(&self) -> Option<&[Option<IoShape>]> {
        match self {
            IoShape::Tensor(_) => None,
            IoShape::Tuple(items) => Some(items),
        }
    }

    /// Dynamic positions shared by every tensor shape inside, sorted.
    ///
    /// `None` when the known entries of a tuple disagree on which positions
    /// are dynamic: no single set can be re-marked on an output then.
    pub fn dynamic_indices(&self) -> Option<Vec<usize>> {
        match self {
            IoShape::Tensor(s) => Some(s.dynamic_indices()),
            IoShape::Tuple(items) => {
                let mut common: Option<Vec<usize>> = None;
                for item in items.iter().flatten() {
                    let indices = item.dynamic_indices()?;
                    match &common {
                        Some(c) if *c != indices => return None,
                        _ => common = Some(indices),
                    }
                }
                Some(common.unwrap_or_default())
            }
        }
    }

    /// Copy with the given positions set to dynamic in every tensor shape.
    pub fn mark_dynamic(&self, indices: &[usize]) -> Self {
        match self {
            IoShape::Tensor(s) => IoShape::Tensor(s.mark_dynamic(indices)),
            IoShape::Tuple(items) => IoShape::Tuple(
                items
                    .iter()
                    .map(|item| item.as_ref().map(|s| s.mark_dynamic(indices)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for IoShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoShape::Tensor(s) => write!(f, "{s}"),
            IoShape::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Some(s) => write!(f, "{s}")?,
                        None => write!(f, "None")?,
                    }
                }
                write!(f, ")")
            }
        }
    }
}

impl From<DynShape> for IoShape {
    fn from(s: DynShape) -> Self {
        IoShape::Tensor(s)
    }
}

impl From<Shape> for IoShape {
    fn from(s: Shape) -> Self {
        IoShape::Tensor(DynShape::from_shape(&s))
    }
}

impl From<&Shape> for IoShape {
    fn from(s: &Shape) -> Self {
        IoShape::Tensor(DynShape::from_shape(s))
    }
}

impl From<Vec<Option<usize>>> for IoShape {
    fn from(dims: Vec<Option<usize>>) -> Self {
        IoShape::Tensor(dims.into())
    }
}

impl From<Vec<usize>> for IoShape {
    fn from(dims: Vec<usize>) -> Self {
        IoShape::Tensor(dims.into())
    }
}

impl From<usize> for IoShape {
    fn from(d: usize) -> Self {
        IoShape::Tensor(d.into())
    }
}

impl From<Vec<Option<IoShape>>> for IoShape {
    fn from(items: Vec<Option<IoShape>>) -> Self {
        IoShape::Tuple(items)
    }
}
