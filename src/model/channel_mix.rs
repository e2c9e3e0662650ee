use derive_getters::Getters;

use super::{config::MixConfig, shift::TokenShift, ModelError};
use crate::tensor::{Matrix, Shape, TensorCpu, TensorError};

/// Projections of a [`ChannelMix`] layer.
#[derive(Debug, Clone)]
pub struct ChannelMixWeights {
    /// `[C, H, 1, 1]`.
    pub key: Matrix,
    /// `[C, H, 1, 1]`.
    pub value: Matrix,
    /// `[H, C, 1, 1]`.
    pub weight: Matrix,
    /// `[C, C, 1, 1]`.
    pub receptance: Matrix,
}

impl ChannelMixWeights {
    pub fn random(rng: &mut fastrand::Rng, num_emb: usize, num_hidden: usize) -> Self {
        let scale = (num_emb as f32).sqrt().recip();
        let hidden_scale = (num_hidden as f32).sqrt().recip();
        Self {
            key: Matrix::random(rng, num_emb, num_hidden, scale),
            value: Matrix::random(rng, num_emb, num_hidden, scale),
            weight: Matrix::random(rng, num_hidden, num_emb, hidden_scale),
            receptance: Matrix::random(rng, num_emb, num_emb, scale),
        }
    }
}

/// Position-wise GeGLU feed-forward gated by the receptance:
/// `CM_{t,c} = σ(R_{t,c}) · Σ_d W_{c,d} · gelu(K_{t,d}) · V_{t,d}`.
#[derive(Debug, Clone, Getters)]
pub struct ChannelMix {
    num_emb: usize,
    num_hidden: usize,
    shift: TokenShift,
    weights: ChannelMixWeights,
}

impl ChannelMix {
    pub fn new(config: &MixConfig, weights: ChannelMixWeights) -> Result<Self, ModelError> {
        config.validate()?;
        let MixConfig {
            num_emb,
            num_hidden,
            ..
        } = *config;

        let checks = [
            (&weights.key, Shape::new(num_emb, num_hidden, 1, 1)),
            (&weights.value, Shape::new(num_emb, num_hidden, 1, 1)),
            (&weights.weight, Shape::new(num_hidden, num_emb, 1, 1)),
            (&weights.receptance, Shape::new(num_emb, num_emb, 1, 1)),
        ];
        for (matrix, expected) in checks {
            if matrix.shape() != expected {
                return Err(TensorError::Shape(matrix.shape(), expected).into());
            }
        }

        Ok(Self {
            num_emb,
            num_hidden,
            shift: config.channel_shift.try_into()?,
            weights,
        })
    }

    pub fn with_shift(mut self, shift: TokenShift) -> Self {
        self.shift = shift;
        self
    }

    /// Run the layer over `input` of shape `[C, T, B, 1]`.
    pub fn forward(&self, input: &TensorCpu<f32>) -> Result<TensorCpu<f32>, ModelError> {
        let shape = input.shape();
        input.check_shape(Shape::new(self.num_emb, shape.num_token(), shape.num_batch(), 1))?;
        if !input.is_finite() {
            return Err(ModelError::NonFinite("channel-mix input"));
        }
        log::trace!("channel-mix forward: {shape}");

        let x = self.shift.forward(input);
        let k = self.weights.key.matmul(&x)?.gelu();
        let v = self.weights.value.matmul(&x)?;
        let kv = self.weights.weight.matmul(&k.try_mul(&v)?)?;
        let r = self.weights.receptance.matmul(&x)?.sigmoid();
        let output = r.try_mul(&kv)?;

        if !output.is_finite() {
            return Err(ModelError::NonFinite("channel-mix output"));
        }
        Ok(output)
    }
}
