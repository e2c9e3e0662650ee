//! Position-dependent scalars of the time-mix weight `W_{t,u,c} = f_h(t - u) · α_h(u) · β_h(t)`
//! and its output factor `γ(t)`.
//!
//! Each capability is a trait so that analytic forms and learned lookup tables are interchangeable.

use std::fmt::Debug;

use super::ModelError;
use crate::tensor::{Shape, TensorCpu};

/// Maps a head and a temporal distance `t - u` to the decay `f_h(t - u)`.
pub trait DecayKernel: Debug + Send + Sync {
    fn decay(&self, head: usize, distance: usize) -> f32;

    /// Number of heads covered, if the kernel is head-specific.
    fn num_head(&self) -> Option<usize> {
        None
    }

    /// Longest distance covered plus one, if bounded.
    fn ctx_len(&self) -> Option<usize> {
        None
    }
}

/// Maps a head and a position to a boundary factor; used for both `α_h(u)` and `β_h(t)`.
pub trait BoundaryFactor: Debug + Send + Sync {
    fn factor(&self, head: usize, position: usize) -> f32;

    fn num_head(&self) -> Option<usize> {
        None
    }

    fn ctx_len(&self) -> Option<usize> {
        None
    }
}

/// Maps a position to the output scale `γ(t)`.
pub trait OutputFactor: Debug + Send + Sync {
    fn factor(&self, position: usize) -> f32;

    fn ctx_len(&self) -> Option<usize> {
        None
    }
}

/// The constant `1`, for any head, distance or position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Unit;

impl DecayKernel for Unit {
    fn decay(&self, _head: usize, _distance: usize) -> f32 {
        1.0
    }
}

impl BoundaryFactor for Unit {
    fn factor(&self, _head: usize, _position: usize) -> f32 {
        1.0
    }
}

impl OutputFactor for Unit {
    fn factor(&self, _position: usize) -> f32 {
        1.0
    }
}

/// `f_h(Δ) = exp(-rate_h · Δ)`. A rate of zero disables the decay of that head.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialDecay {
    rates: Vec<f32>,
}

impl ExponentialDecay {
    pub fn new(rates: Vec<f32>) -> Result<Self, ModelError> {
        if rates.is_empty() {
            return Err(ModelError::InvalidConfig(
                "exponential decay needs at least one head".into(),
            ));
        }
        if let Some(rate) = rates.iter().find(|x| !x.is_finite() || **x < 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "decay rate {rate} must be finite and non-negative"
            )));
        }
        Ok(Self { rates })
    }

    /// Rates spread geometrically from `1` down to `1 / 2^(H-1)`, so heads see increasingly far.
    pub fn geometric(num_head: usize) -> Result<Self, ModelError> {
        Self::new((0..num_head).map(|h| 0.5f32.powi(h as i32)).collect())
    }
}

impl DecayKernel for ExponentialDecay {
    #[inline]
    fn decay(&self, head: usize, distance: usize) -> f32 {
        (-self.rates[head] * distance as f32).exp()
    }

    fn num_head(&self) -> Option<usize> {
        Some(self.rates.len())
    }
}

fn check_table(
    name: &str,
    table: &TensorCpu<f32>,
    expected: Shape,
) -> Result<(), ModelError> {
    table.check_shape(expected)?;
    if !table.is_finite() {
        return Err(ModelError::NonFinite("parameter table"));
    }
    if table.is_empty() {
        return Err(ModelError::InvalidConfig(format!("{name} is empty")));
    }
    Ok(())
}

/// A learned decay table of shape `[ctx_len, H, 1, 1]`, indexed by distance.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayTable(TensorCpu<f32>);

impl DecayTable {
    pub fn new(table: TensorCpu<f32>) -> Result<Self, ModelError> {
        let shape = table.shape();
        check_table("decay table", &table, Shape::new(shape[0], shape[1], 1, 1))?;
        Ok(Self(table))
    }

    /// Build from a table laid out like `time_w`, whose last column is distance `0`.
    pub fn from_reversed(table: TensorCpu<f32>) -> Result<Self, ModelError> {
        let shape = table.shape();
        let ctx_len = shape[0];
        let data = table
            .data()
            .chunks_exact(ctx_len.max(1))
            .flat_map(|row| row.iter().rev().copied())
            .collect();
        Self::new(TensorCpu::from_data(shape, data)?)
    }
}

impl DecayKernel for DecayTable {
    #[inline]
    fn decay(&self, head: usize, distance: usize) -> f32 {
        self.0[Shape::new(distance, head, 0, 0)]
    }

    fn num_head(&self) -> Option<usize> {
        Some(self.0.shape()[1])
    }

    fn ctx_len(&self) -> Option<usize> {
        Some(self.0.shape()[0])
    }
}

/// A learned per-head factor table of shape `[ctx_len, H, 1, 1]`, indexed by position.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryTable(TensorCpu<f32>);

impl BoundaryTable {
    pub fn new(table: TensorCpu<f32>) -> Result<Self, ModelError> {
        let shape = table.shape();
        check_table("boundary table", &table, Shape::new(shape[0], shape[1], 1, 1))?;
        Ok(Self(table))
    }
}

impl BoundaryFactor for BoundaryTable {
    #[inline]
    fn factor(&self, head: usize, position: usize) -> f32 {
        self.0[Shape::new(position, head, 0, 0)]
    }

    fn num_head(&self) -> Option<usize> {
        Some(self.0.shape()[1])
    }

    fn ctx_len(&self) -> Option<usize> {
        Some(self.0.shape()[0])
    }
}

/// A learned output factor table of shape `[ctx_len, 1, 1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaTable(TensorCpu<f32>);

impl GammaTable {
    pub fn new(table: TensorCpu<f32>) -> Result<Self, ModelError> {
        let shape = Shape::new(table.len(), 1, 1, 1);
        let table = table.reshape(shape)?;
        check_table("gamma table", &table, shape)?;
        Ok(Self(table))
    }
}

impl OutputFactor for GammaTable {
    #[inline]
    fn factor(&self, position: usize) -> f32 {
        self.0.data()[position]
    }

    fn ctx_len(&self) -> Option<usize> {
        Some(self.0.len())
    }
}
