use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::ModelError;

/// How much of the input a layer takes from earlier positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    /// Fraction of the channels copied from `t - distance`.
    pub fraction: f32,
    /// How many positions back the shifted channels come from.
    pub distance: usize,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            fraction: 0.5,
            distance: 1,
        }
    }
}

impl ShiftConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(0.0..=1.0).contains(&self.fraction) {
            return Err(ModelError::InvalidConfig(format!(
                "shift fraction {} outside [0, 1]",
                self.fraction
            )));
        }
        if self.distance == 0 {
            return Err(ModelError::InvalidConfig(
                "shift distance must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Dimensions of one time-mix/channel-mix block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixConfig {
    pub num_emb: usize,
    pub num_head: usize,
    pub num_hidden: usize,
    /// Longest sequence the learned lookup tables cover.
    pub ctx_len: usize,
    #[serde(default)]
    pub time_shift: ShiftConfig,
    #[serde(default)]
    pub channel_shift: ShiftConfig,
}

impl MixConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    #[inline]
    pub fn head_size(&self) -> usize {
        self.num_emb / self.num_head
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.num_emb == 0 {
            return Err(ModelError::InvalidConfig("num_emb must be positive".into()));
        }
        if self.num_head == 0 {
            return Err(ModelError::InvalidConfig(
                "num_head must be positive".into(),
            ));
        }
        if self.num_emb % self.num_head != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "num_emb {} not divisible by num_head {}",
                self.num_emb, self.num_head
            )));
        }
        if self.num_hidden == 0 {
            return Err(ModelError::InvalidConfig(
                "num_hidden must be positive".into(),
            ));
        }
        if self.ctx_len == 0 {
            return Err(ModelError::InvalidConfig("ctx_len must be positive".into()));
        }
        self.time_shift.validate()?;
        self.channel_shift.validate()?;
        Ok(())
    }
}
