use safetensors::{Dtype, SafeTensorError};
use thiserror::Error;

use crate::tensor::TensorError;

pub use block::{Block, LayerNorm};
pub use channel_mix::ChannelMix;
pub use config::{MixConfig, ShiftConfig};
pub use decay::{
    BoundaryFactor, BoundaryTable, DecayKernel, DecayTable, ExponentialDecay, GammaTable,
    OutputFactor, Unit,
};
pub use loader::{Loader, Reader};
pub use shift::TokenShift;
pub use time_mix::TimeMix;

pub mod block;
pub mod channel_mix;
pub mod config;
pub mod decay;
pub mod loader;
pub mod shift;
pub mod time_mix;

/// Epsilon of the layer norms in a [`Block`].
pub const LAYER_NORM_EPS: f32 = 1.0e-5;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("sequence of length {len} exceeds context length {ctx_len}")]
    ContextOverflow { len: usize, ctx_len: usize },
    #[error("non-finite values produced at {0}")]
    NonFinite(&'static str),
    #[error("tensor {0} not found")]
    MissingTensor(String),
    #[error("tensor {name} has unsupported dtype {dtype:?}")]
    UnsupportedDtype { name: String, dtype: Dtype },
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    SafeTensor(#[from] SafeTensorError),
}
