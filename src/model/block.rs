use derive_getters::Getters;

use super::{
    channel_mix::{ChannelMix, ChannelMixWeights},
    config::MixConfig,
    time_mix::{TimeMix, TimeMixWeights},
    ModelError, LAYER_NORM_EPS,
};
use crate::tensor::{Shape, TensorCpu};

#[derive(Debug, Clone, PartialEq)]
pub struct LayerNorm {
    pub w: TensorCpu<f32>,
    pub b: TensorCpu<f32>,
}

impl LayerNorm {
    /// Unit weight and zero bias.
    pub fn identity(num_emb: usize) -> Self {
        let shape = Shape::new(num_emb, 1, 1, 1);
        Self {
            w: TensorCpu::ones(shape),
            b: TensorCpu::zeros(shape),
        }
    }

    pub fn forward(&self, input: &TensorCpu<f32>) -> Result<TensorCpu<f32>, ModelError> {
        Ok(input.layer_norm(&self.w, &self.b, LAYER_NORM_EPS)?)
    }
}

/// One residual block: `x += TM(LN1(x)); x += CM(LN2(x))`.
#[derive(Debug, Getters)]
pub struct Block {
    ln1: LayerNorm,
    att: TimeMix,
    ln2: LayerNorm,
    ffn: ChannelMix,
}

impl Block {
    pub fn new(ln1: LayerNorm, att: TimeMix, ln2: LayerNorm, ffn: ChannelMix) -> Self {
        Self { ln1, att, ln2, ffn }
    }

    /// A randomly initialized block, for experiments and benchmarks.
    pub fn random(rng: &mut fastrand::Rng, config: &MixConfig) -> Result<Self, ModelError> {
        let att = TimeMix::new(config, TimeMixWeights::random(rng, config.num_emb))?;
        let ffn = ChannelMix::new(
            config,
            ChannelMixWeights::random(rng, config.num_emb, config.num_hidden),
        )?;
        Ok(Self {
            ln1: LayerNorm::identity(config.num_emb),
            att,
            ln2: LayerNorm::identity(config.num_emb),
            ffn,
        })
    }

    pub fn forward(&self, input: &TensorCpu<f32>) -> Result<TensorCpu<f32>, ModelError> {
        log::debug!("block forward: {}", input.shape());
        let x = self.ln1.forward(input)?;
        let x = input.try_add(&self.att.forward(&x)?)?;
        let y = self.ln2.forward(&x)?;
        let y = x.try_add(&self.ffn.forward(&y)?)?;
        Ok(y)
    }
}
