use std::hash::Hash;

use rwkv_mix_derive::{Deref, DerefMut};

use super::TensorError;

/// The shape of a [`TensorCpu`](super::TensorCpu).
/// Note that the fastest-moving axis occupies the lowest shape index, which is opposite to that in `torch`.
///
/// Activations use the layout `[C, T, B, 1]`: channels, positions, batch.
#[derive(Debug, Default, Clone, Copy, Deref, DerefMut, PartialEq, Eq, Hash)]
pub struct Shape([usize; 4]);

impl Shape {
    pub fn new(x: usize, y: usize, z: usize, w: usize) -> Self {
        Self([x, y, z, w])
    }

    /// Deduce a shape from a `torch`-ordered dimension list, e.g. from a safetensors header.
    pub fn from_slice_rev(shape: &[usize]) -> Result<Self, TensorError> {
        let shape = match shape[..] {
            [] => Shape::new(1, 1, 1, 1),
            [x] => Shape::new(x, 1, 1, 1),
            [y, x] => Shape::new(x, y, 1, 1),
            [z, y, x] => Shape::new(x, y, z, 1),
            [w, z, y, x] => Shape::new(x, y, z, w),
            _ => return Err(TensorError::Deduce(shape.to_vec())),
        };
        Ok(shape)
    }

    pub fn len(&self) -> usize {
        self.0.into_iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.0.into_iter().any(|x| x == 0)
    }

    /// Convert a shaped index into a linear index.
    pub fn shape_index(&self, indices: Shape) -> usize {
        Iterator::zip(self.0.into_iter().rev(), indices.0.into_iter().rev())
            .fold(0, |acc, (shape, index)| acc * shape + index)
    }

    /// Number of channels of an activation.
    #[inline]
    pub fn num_emb(&self) -> usize {
        self[0]
    }

    /// Number of positions of an activation.
    #[inline]
    pub fn num_token(&self) -> usize {
        self[1]
    }

    /// Number of independent sequences of an activation.
    #[inline]
    pub fn num_batch(&self) -> usize {
        self[2]
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self[0], self[1], self[2], self[3])
    }
}

impl std::ops::Sub<Shape> for Shape {
    type Output = Self;

    fn sub(self, rhs: Shape) -> Self::Output {
        Self::new(
            self[0] - rhs[0],
            self[1] - rhs[1],
            self[2] - rhs[2],
            self[3] - rhs[3],
        )
    }
}

pub trait TensorAxis: Clone + PartialEq + Eq + Hash {
    fn bounds(&self, dim: usize) -> Result<(usize, usize), TensorError>;
}

#[inline]
fn check_bounds(dim: usize, start: usize, end: usize) -> Result<(usize, usize), TensorError> {
    if start > end || end > dim {
        Err(TensorError::SliceOutOfRange { dim, start, end })
    } else {
        Ok((start, end))
    }
}

impl TensorAxis for usize {
    fn bounds(&self, dim: usize) -> Result<(usize, usize), TensorError> {
        let start = *self;
        check_bounds(dim, start, start + 1)
    }
}

impl TensorAxis for std::ops::RangeFull {
    fn bounds(&self, dim: usize) -> Result<(usize, usize), TensorError> {
        Ok((0, dim))
    }
}

impl TensorAxis for std::ops::Range<usize> {
    fn bounds(&self, dim: usize) -> Result<(usize, usize), TensorError> {
        check_bounds(dim, self.start, self.end)
    }
}

impl TensorAxis for std::ops::RangeInclusive<usize> {
    fn bounds(&self, dim: usize) -> Result<(usize, usize), TensorError> {
        check_bounds(dim, *self.start(), self.end() + 1)
    }
}

impl TensorAxis for std::ops::RangeFrom<usize> {
    fn bounds(&self, dim: usize) -> Result<(usize, usize), TensorError> {
        check_bounds(dim, self.start, dim)
    }
}

impl TensorAxis for std::ops::RangeTo<usize> {
    fn bounds(&self, dim: usize) -> Result<(usize, usize), TensorError> {
        check_bounds(dim, 0, self.end)
    }
}

pub trait TensorSlice {
    /// Start (inclusive) and end (exclusive) corners of the slice.
    fn shape_bounds(&self, shape: Shape) -> Result<(Shape, Shape), TensorError>;
}

impl<X, Y, Z> TensorSlice for (X, Y, Z)
where
    X: TensorAxis,
    Y: TensorAxis,
    Z: TensorAxis,
{
    fn shape_bounds(&self, shape: Shape) -> Result<(Shape, Shape), TensorError> {
        let (x, y, z) = self;
        let (x0, x1) = x.bounds(shape[0])?;
        let (y0, y1) = y.bounds(shape[1])?;
        let (z0, z1) = z.bounds(shape[2])?;
        Ok((
            Shape::new(x0, y0, z0, 0),
            Shape::new(x1, y1, z1, shape[3]),
        ))
    }
}
