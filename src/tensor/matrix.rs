use half::f16;
use itertools::Itertools;

use super::{Shape, TensorCpu, TensorError};
use crate::num::Float;

/// A linear projection stored as `[K, M, 1, 1]`: `K` input channels (fastest) and `M` outputs.
/// This is the memory layout of a `torch` `Linear` weight of size `[M, K]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Matrix {
    Fp32(TensorCpu<f32>),
    Fp16(TensorCpu<f16>),
}

impl Matrix {
    /// An identity projection of size `n`.
    pub fn identity(n: usize) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Self::Fp32(TensorCpu { shape: Shape::new(n, n, 1, 1), data })
    }

    /// A projection with entries drawn uniformly from `[-scale, scale)`.
    pub fn random(rng: &mut fastrand::Rng, num_in: usize, num_out: usize, scale: f32) -> Self {
        let data = (0..num_in * num_out)
            .map(|_| scale * (2.0 * rng.f32() - 1.0))
            .collect();
        Self::Fp32(TensorCpu {
            shape: Shape::new(num_in, num_out, 1, 1),
            data,
        })
    }

    pub fn shape(&self) -> Shape {
        match self {
            Matrix::Fp32(w) => w.shape(),
            Matrix::Fp16(w) => w.shape(),
        }
    }

    /// Project every channel vector of `input` (`[K, T, B, 1]`) into `[M, T, B, 1]`.
    pub fn matmul(&self, input: &TensorCpu<f32>) -> Result<TensorCpu<f32>, TensorError> {
        match self {
            Matrix::Fp32(w) => matmul(w, input),
            Matrix::Fp16(w) => matmul(w, input),
        }
    }
}

fn matmul<T: Float>(
    matrix: &TensorCpu<T>,
    input: &TensorCpu<f32>,
) -> Result<TensorCpu<f32>, TensorError> {
    let [k, m, ..] = *matrix.shape();
    let shape = input.shape();
    if shape[0] != k || shape[3] != 1 {
        return Err(TensorError::Shape(
            shape,
            Shape::new(k, shape[1], shape[2], 1),
        ));
    }

    let data = input
        .data()
        .chunks_exact(k)
        .flat_map(|x| {
            matrix.data().chunks_exact(k).map(move |row| {
                Iterator::zip(row.iter(), x.iter())
                    .map(|(w, x)| w.to_f32() * x)
                    .sum::<f32>()
            })
        })
        .collect_vec();
    TensorCpu::from_data(Shape::new(m, shape[1], shape[2], 1), data)
}
