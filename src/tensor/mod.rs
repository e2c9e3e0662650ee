use itertools::Itertools;
use thiserror::Error;

use crate::num::{Float, Scalar};
pub use matrix::Matrix;
pub use shape::{Shape, TensorAxis, TensorSlice};

pub mod matrix;
pub mod ops;
pub mod shape;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("data size not match: {0} vs. {1}")]
    Size(usize, usize),
    #[error("tensor shape not match: {0} vs. {1}")]
    Shape(Shape, Shape),
    #[error("slice {start}..{end} out of range for dimension size {dim}")]
    SliceOutOfRange {
        dim: usize,
        start: usize,
        end: usize,
    },
    #[error("cannot deduce a shape from dimensions {0:?}")]
    Deduce(Vec<usize>),
}

/// A dense tensor living in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorCpu<T: Scalar> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: Scalar> TensorCpu<T> {
    pub fn from_data(shape: Shape, data: Vec<T>) -> Result<Self, TensorError> {
        if shape.len() != data.len() {
            return Err(TensorError::Size(shape.len(), data.len()));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Shape) -> Self {
        let data = vec![T::zero(); shape.len()];
        Self { shape, data }
    }

    pub fn ones(shape: Shape) -> Self {
        let data = vec![T::one(); shape.len()];
        Self { shape, data }
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Check that the tensor has the expected shape.
    pub fn check_shape(&self, shape: Shape) -> Result<(), TensorError> {
        if self.shape != shape {
            return Err(TensorError::Shape(self.shape, shape));
        }
        Ok(())
    }

    /// Reinterpret the data under a new shape of the same length.
    pub fn reshape(self, shape: Shape) -> Result<Self, TensorError> {
        if self.shape.len() != shape.len() {
            return Err(TensorError::Size(shape.len(), self.shape.len()));
        }
        Ok(Self {
            shape,
            data: self.data,
        })
    }

    /// Copy out a sub-tensor.
    pub fn slice(&self, slice: impl TensorSlice) -> Result<Self, TensorError> {
        let (start, end) = slice.shape_bounds(self.shape)?;
        let shape = end - start;

        let mut data = Vec::with_capacity(shape.len());
        for (w, z, y) in itertools::iproduct!(start[3]..end[3], start[2]..end[2], start[1]..end[1])
        {
            let from = self.shape.shape_index(Shape::new(start[0], y, z, w));
            data.extend_from_slice(&self.data[from..from + shape[0]]);
        }
        Ok(Self { shape, data })
    }

    /// Concatenate tensors along the batch axis.
    pub fn stack(batches: Vec<Self>) -> Result<Self, TensorError> {
        let Some(first) = batches.first() else {
            return Ok(Self::zeros(Shape::default()));
        };
        let shape = first.shape;
        let num_batch = batches
            .iter()
            .map(|tensor| {
                let expected = Shape::new(shape[0], shape[1], tensor.shape[2], 1);
                tensor.check_shape(expected).map(|_| tensor.shape[2])
            })
            .fold_ok(0, |acc, x| acc + x)?;

        let data = batches.into_iter().flat_map(|x| x.data).collect_vec();
        let shape = Shape::new(shape[0], shape[1], num_batch, 1);
        Ok(Self { shape, data })
    }

    /// The channel vector at position `token` of sequence `batch`.
    #[inline]
    pub fn vector(&self, token: usize, batch: usize) -> &[T] {
        let start = self.shape.shape_index(Shape::new(0, token, batch, 0));
        &self.data[start..start + self.shape[0]]
    }

    #[inline]
    pub fn vector_mut(&mut self, token: usize, batch: usize) -> &mut [T] {
        let start = self.shape.shape_index(Shape::new(0, token, batch, 0));
        let len = self.shape[0];
        &mut self.data[start..start + len]
    }

    pub fn map<U: Scalar>(&self, f: impl Fn(T) -> U) -> TensorCpu<U> {
        TensorCpu {
            shape: self.shape,
            data: self.data.iter().copied().map(f).collect(),
        }
    }
}

impl<T: Float> TensorCpu<T> {
    /// Widen into a single-precision tensor.
    pub fn to_f32(&self) -> TensorCpu<f32> {
        self.map(<T as Float>::to_f32)
    }
}

impl<T: Scalar> std::ops::Index<Shape> for TensorCpu<T> {
    type Output = T;

    fn index(&self, index: Shape) -> &Self::Output {
        &self.data[self.shape.shape_index(index)]
    }
}

impl<T: Scalar> std::ops::IndexMut<Shape> for TensorCpu<T> {
    fn index_mut(&mut self, index: Shape) -> &mut Self::Output {
        let index = self.shape.shape_index(index);
        &mut self.data[index]
    }
}
