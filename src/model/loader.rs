use std::borrow::Cow;

use anyhow::Result;
use half::f16;
use safetensors::{Dtype, SafeTensorError, SafeTensors};

use super::{
    block::{Block, LayerNorm},
    channel_mix::{ChannelMix, ChannelMixWeights},
    config::MixConfig,
    decay::{BoundaryTable, DecayTable, GammaTable},
    time_mix::{TimeMix, TimeMixWeights},
    ModelError,
};
use crate::{
    num::{Float, Scalar},
    tensor::{Matrix, Shape, TensorCpu},
};

/// Interface accessing a safetensors data blob.
pub trait Reader {
    fn names(&self) -> Vec<&str>;
    fn contains(&self, name: &str) -> bool;
    fn tensor(&self, name: &str) -> Result<(Dtype, Vec<usize>, Cow<'_, [u8]>), SafeTensorError>;
}

impl Reader for SafeTensors<'_> {
    #[inline]
    fn names(&self) -> Vec<&str> {
        self.names().into_iter().map(AsRef::as_ref).collect()
    }

    #[inline]
    fn contains(&self, name: &str) -> bool {
        self.names().into_iter().any(|x| x == name)
    }

    #[inline]
    fn tensor(&self, name: &str) -> Result<(Dtype, Vec<usize>, Cow<'_, [u8]>), SafeTensorError> {
        let tensor = self.tensor(name)?;
        let shape = tensor.shape().to_vec();
        Ok((tensor.dtype(), shape, Cow::from(tensor.data())))
    }
}

fn decode<T: Float>(data: &[u8]) -> Vec<f32> {
    T::from_bytes(data).into_iter().map(Float::to_f32).collect()
}

/// Loads RWKV v1 block parameters.
pub struct Loader<'a> {
    model: &'a dyn Reader,
}

impl<'a> Loader<'a> {
    pub fn new(model: &'a dyn Reader) -> Self {
        Self { model }
    }

    /// Number of blocks in the model.
    pub fn num_layer(&self) -> Result<usize> {
        const PREFIX: &str = "blocks.";
        let mut num_layer = 0;
        for name in self.model.names() {
            if let Some(name) = name.strip_prefix(PREFIX) {
                let index = &name[..name.find('.').unwrap_or(name.len())];
                num_layer = num_layer.max(index.parse::<usize>()? + 1);
            }
        }
        Ok(num_layer)
    }

    fn raw(&self, name: &str) -> Result<(Dtype, Shape, Cow<'a, [u8]>)> {
        if !self.model.contains(name) {
            return Err(ModelError::MissingTensor(name.into()).into());
        }
        let (dtype, shape, data) = self.model.tensor(name)?;
        let shape = Shape::from_slice_rev(&shape)?;
        Ok((dtype, shape, data))
    }

    /// Load a tensor, widening it into `f32`.
    pub fn load_f32(&self, name: &str) -> Result<TensorCpu<f32>> {
        let (dtype, shape, data) = self.raw(name)?;
        let data = match dtype {
            Dtype::F32 => decode::<f32>(&data),
            Dtype::F16 => decode::<f16>(&data),
            dtype => {
                let name = name.into();
                return Err(ModelError::UnsupportedDtype { name, dtype }.into());
            }
        };
        Ok(TensorCpu::from_data(shape, data)?)
    }

    /// Load a projection, keeping half-precision weights in half precision.
    pub fn load_matrix(&self, name: &str) -> Result<Matrix> {
        let (dtype, shape, data) = self.raw(name)?;
        let matrix = match dtype {
            Dtype::F32 => Matrix::Fp32(TensorCpu::from_data(shape, f32::from_bytes(&data))?),
            Dtype::F16 => Matrix::Fp16(TensorCpu::from_data(shape, f16::from_bytes(&data))?),
            dtype => {
                let name = name.into();
                return Err(ModelError::UnsupportedDtype { name, dtype }.into());
            }
        };
        Ok(matrix)
    }

    /// Deduce the dimensions of block `layer` from its tensors.
    pub fn config(&self, layer: usize) -> Result<MixConfig> {
        let (_, key, _) = self.raw(&format!("blocks.{layer}.att.key.weight"))?;
        let (_, ffn, _) = self.raw(&format!("blocks.{layer}.ffn.key.weight"))?;
        let (_, time_w, _) = self.raw(&format!("blocks.{layer}.att.time_w"))?;

        let config = MixConfig {
            num_emb: key[0],
            num_head: time_w[1],
            num_hidden: ffn[1],
            ctx_len: time_w[0],
            time_shift: Default::default(),
            channel_shift: Default::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn load_table(&self, name: &str, config: &MixConfig) -> Result<TensorCpu<f32>> {
        let table = self.load_f32(name)?;
        Ok(table.reshape(Shape::new(config.ctx_len, config.num_head, 1, 1))?)
    }

    pub fn load_time_mix(&self, layer: usize, config: &MixConfig) -> Result<TimeMix> {
        let att = format!("blocks.{layer}.att");
        let weights = TimeMixWeights {
            key: self.load_matrix(&format!("{att}.key.weight"))?,
            value: self.load_matrix(&format!("{att}.value.weight"))?,
            receptance: self.load_matrix(&format!("{att}.receptance.weight"))?,
            output: self.load_matrix(&format!("{att}.output.weight"))?,
        };

        let decay = DecayTable::from_reversed(self.load_table(&format!("{att}.time_w"), config)?)?;
        let alpha = BoundaryTable::new(self.load_table(&format!("{att}.time_alpha"), config)?)?;
        let beta = BoundaryTable::new(self.load_table(&format!("{att}.time_beta"), config)?)?;
        let gamma = GammaTable::new(self.load_f32(&format!("{att}.time_gamma"))?)?;

        let layer = TimeMix::new(config, weights)?
            .with_decay(decay)?
            .with_alpha(alpha)?
            .with_beta(beta)?
            .with_gamma(gamma);
        Ok(layer)
    }

    pub fn load_channel_mix(&self, layer: usize, config: &MixConfig) -> Result<ChannelMix> {
        let ffn = format!("blocks.{layer}.ffn");
        let weights = ChannelMixWeights {
            key: self.load_matrix(&format!("{ffn}.key.weight"))?,
            value: self.load_matrix(&format!("{ffn}.value.weight"))?,
            weight: self.load_matrix(&format!("{ffn}.weight.weight"))?,
            receptance: self.load_matrix(&format!("{ffn}.receptance.weight"))?,
        };
        Ok(ChannelMix::new(config, weights)?)
    }

    pub fn load_layer_norm(&self, name: &str, config: &MixConfig) -> Result<LayerNorm> {
        let shape = Shape::new(config.num_emb, 1, 1, 1);
        let w = self.load_f32(&format!("{name}.weight"))?.reshape(shape)?;
        let b = self.load_f32(&format!("{name}.bias"))?.reshape(shape)?;
        Ok(LayerNorm { w, b })
    }

    /// Load block `layer`. Shift settings are taken from `config`; dimensions must match the blob.
    pub fn load_block(&self, layer: usize, config: &MixConfig) -> Result<Block> {
        let deduced = self.config(layer)?;
        if (deduced.num_emb, deduced.num_head, deduced.num_hidden, deduced.ctx_len)
            != (config.num_emb, config.num_head, config.num_hidden, config.ctx_len)
        {
            return Err(ModelError::InvalidConfig(format!(
                "block {layer} has dimensions {deduced:?}, expected {config:?}"
            ))
            .into());
        }

        let ln1 = self.load_layer_norm(&format!("blocks.{layer}.ln1"), config)?;
        let ln2 = self.load_layer_norm(&format!("blocks.{layer}.ln2"), config)?;
        let att = self.load_time_mix(layer, config)?;
        let ffn = self.load_channel_mix(layer, config)?;
        log::info!(
            "loaded block {layer}: emb {}, heads {}, hidden {}, ctx {}",
            config.num_emb,
            config.num_head,
            config.num_hidden,
            config.ctx_len
        );
        Ok(Block::new(ln1, att, ln2, ffn))
    }

    /// Load every block, each with the dimensions found in the blob and default shifts.
    pub fn load_blocks(&self) -> Result<Vec<Block>> {
        (0..self.num_layer()?)
            .map(|layer| {
                let config = self.config(layer)?;
                self.load_block(layer, &config)
            })
            .collect()
    }
}
