pub mod model;
pub mod num;
pub mod sampler;
pub mod tensor;

pub use model::{Block, ChannelMix, Loader, MixConfig, ModelError, TimeMix, TokenShift};
pub use sampler::{Candidates, SamplerConfig, SamplerError, TruncationSampler};
pub use tensor::{Matrix, Shape, TensorCpu, TensorError};
