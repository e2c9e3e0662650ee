//! Decode-time truncation sampling.
//!
//! Tokens whose probability falls below `coefficient · p_max^exponent` are dropped, the rest are
//! renormalized and one of them is drawn.

use derive_getters::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplerError {
    #[error("empty distribution")]
    Empty,
    #[error("invalid probability {value} at index {index}")]
    InvalidProbability { index: usize, value: f32 },
    #[error("distribution has zero total mass")]
    ZeroMass,
    #[error("invalid sampler config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub coefficient: f32,
    pub exponent: f32,
    /// Applied to the surviving candidates only; `1` leaves them untouched.
    pub temperature: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            coefficient: 0.02,
            exponent: 2.0,
            temperature: 1.0,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), SamplerError> {
        if !self.coefficient.is_finite() || self.coefficient < 0.0 {
            return Err(SamplerError::InvalidConfig(format!(
                "coefficient {} must be finite and non-negative",
                self.coefficient
            )));
        }
        if !self.exponent.is_finite() {
            return Err(SamplerError::InvalidConfig(format!(
                "exponent {} must be finite",
                self.exponent
            )));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(SamplerError::InvalidConfig(format!(
                "temperature {} must be finite and positive",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Softmax over raw logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.iter().map(|x| (x - max).exp()).collect_vec();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|x| x / sum).collect()
}

/// The truncated support of a distribution, renormalized.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct Candidates {
    indices: Vec<usize>,
    probs: Vec<f32>,
}

impl Candidates {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Pick a candidate given a uniform draw from `[0, 1)`.
    pub fn draw(&self, rand: f32) -> usize {
        self.indices
            .iter()
            .zip(self.probs.iter())
            .scan(0.0, |cum, (&index, &p)| {
                *cum += p;
                Some((index, *cum))
            })
            .find_or_last(|&(_, cum)| rand < cum)
            .map(|(index, _)| index)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Getters)]
pub struct TruncationSampler {
    config: SamplerConfig,
}

impl TruncationSampler {
    pub fn new(config: SamplerConfig) -> Result<Self, SamplerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Probabilities below this are dropped.
    #[inline]
    pub fn threshold(&self, p_max: f32) -> f32 {
        self.config.coefficient * p_max.powf(self.config.exponent)
    }

    /// Restrict `probs` to its candidate set. The input is normalized first, so any positive
    /// scaling of it gives the same result. The most probable index always survives.
    pub fn truncate(&self, probs: &[f32]) -> Result<Candidates, SamplerError> {
        if probs.is_empty() {
            return Err(SamplerError::Empty);
        }
        if let Some((index, &value)) = probs
            .iter()
            .find_position(|p| !p.is_finite() || **p < 0.0)
        {
            return Err(SamplerError::InvalidProbability { index, value });
        }
        let total: f32 = probs.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(SamplerError::ZeroMass);
        }

        let (argmax, p_max) = probs
            .iter()
            .map(|p| p / total)
            .enumerate()
            .max_by(|(_, x), (_, y)| x.total_cmp(y))
            .ok_or(SamplerError::Empty)?;
        let threshold = self.threshold(p_max);

        let num_token = probs.len();
        let temperature = self.config.temperature;
        // relative to the argmax, so its weight stays exactly 1 and the sum never underflows
        let (indices, probs): (Vec<_>, Vec<_>) = probs
            .iter()
            .map(|p| p / total)
            .enumerate()
            .filter(|&(index, p)| index == argmax || p >= threshold)
            .map(|(index, p)| match index == argmax {
                true => (index, 1.0),
                false => (index, (p / p_max).powf(temperature.recip())),
            })
            .unzip();

        let sum: f64 = probs.iter().map(|&p| p as f64).sum();
        let probs = probs.into_iter().map(|p| (p as f64 / sum) as f32).collect();
        log::trace!(
            "truncation kept {} of {num_token} candidates, threshold {threshold}",
            indices.len()
        );
        Ok(Candidates { indices, probs })
    }

    /// Draw one index using `rand`, a uniform sample from `[0, 1)`.
    pub fn sample_with(&self, probs: &[f32], rand: f32) -> Result<usize, SamplerError> {
        Ok(self.truncate(probs)?.draw(rand))
    }

    /// Draw one index using the thread-local generator.
    pub fn sample(&self, probs: &[f32]) -> Result<usize, SamplerError> {
        self.sample_with(probs, fastrand::f32())
    }

    /// Draw one index from a seeded generator.
    pub fn sample_rng(&self, probs: &[f32], rng: &mut fastrand::Rng) -> Result<usize, SamplerError> {
        self.sample_with(probs, rng.f32())
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::{softmax, SamplerConfig, SamplerError, TruncationSampler};

    fn is_approx_eps(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() <= f32::max(eps, f32::max(a.abs(), b.abs()) * eps)
    }

    fn assert_distribution(probs: &[f32]) {
        assert!(probs.iter().all(|&p| p >= 0.0));
        let sum: f64 = probs.iter().map(|&p| p as f64).sum();
        assert!((sum - 1.0).abs() <= 1.0e-6, "sums to {sum}");
    }

    #[test]
    fn test_keep_all() -> Result<(), anyhow::Error> {
        let sampler = TruncationSampler::default();
        for probs in [vec![0.9, 0.05, 0.03, 0.02], vec![0.5, 0.4, 0.05, 0.05]] {
            let candidates = sampler.truncate(&probs)?;
            assert_eq!(candidates.indices(), &[0, 1, 2, 3]);
            for (&a, &b) in candidates.probs().iter().zip_eq(&probs) {
                assert!(is_approx_eps(a, b, 1.0e-6));
            }
            assert_distribution(candidates.probs());
        }
        assert!(is_approx_eps(sampler.threshold(0.9), 0.0162, 1.0e-6));
        assert!(is_approx_eps(sampler.threshold(0.5), 0.005, 1.0e-6));
        Ok(())
    }

    #[test]
    fn test_drop_tail() -> Result<(), anyhow::Error> {
        let sampler = TruncationSampler::default();
        let candidates = sampler.truncate(&[0.6, 0.002, 0.398])?;
        assert_eq!(candidates.indices(), &[0, 2]);
        assert!(is_approx_eps(candidates.probs()[0], 0.6 / 0.998, 1.0e-6));
        assert!(is_approx_eps(candidates.probs()[1], 0.398 / 0.998, 1.0e-6));
        assert_distribution(candidates.probs());

        for _ in 0..100 {
            assert_ne!(sampler.sample(&[0.6, 0.002, 0.398])?, 1);
        }
        Ok(())
    }

    #[test]
    fn test_never_empty() -> Result<(), anyhow::Error> {
        let mut rng = fastrand::Rng::with_seed(31);
        let configs = [
            SamplerConfig::default(),
            SamplerConfig {
                coefficient: 2.0,
                exponent: 1.0,
                temperature: 1.0,
            },
            SamplerConfig {
                coefficient: 0.5,
                exponent: 0.0,
                temperature: 0.7,
            },
        ];
        for config in configs {
            let sampler = TruncationSampler::new(config)?;
            for len in [1, 2, 17, 1000] {
                let probs = softmax(&(0..len).map(|_| 20.0 * rng.f32()).collect_vec());
                let candidates = sampler.truncate(&probs)?;
                assert!(!candidates.is_empty());

                let argmax = probs.iter().position_max_by(|x, y| x.total_cmp(y)).unwrap();
                assert!(candidates.indices().contains(&argmax));
                assert_distribution(candidates.probs());
            }
        }

        // a uniform distribution keeps everything
        let candidates = TruncationSampler::default().truncate(&[0.25; 4])?;
        assert_eq!(candidates.len(), 4);
        Ok(())
    }

    #[test]
    fn test_scale_invariance() -> Result<(), anyhow::Error> {
        let sampler = TruncationSampler::default();
        let mut rng = fastrand::Rng::with_seed(37);
        let probs = softmax(&(0..64).map(|_| 12.0 * rng.f32()).collect_vec());
        let reference = sampler.truncate(&probs)?;
        assert!(reference.len() < 64);

        for scale in [0.5, 3.0, 1000.0] {
            let scaled = probs.iter().map(|p| p * scale).collect_vec();
            let candidates = sampler.truncate(&scaled)?;
            assert_eq!(candidates.indices(), reference.indices());
            for (&a, &b) in candidates.probs().iter().zip_eq(reference.probs()) {
                assert!(is_approx_eps(a, b, 1.0e-5));
            }
        }
        Ok(())
    }

    #[test]
    fn test_temperature() -> Result<(), anyhow::Error> {
        let probs = [0.6, 0.3, 0.1];
        let cold = TruncationSampler::new(SamplerConfig {
            temperature: 0.5,
            ..Default::default()
        })?
        .truncate(&probs)?;
        assert_eq!(cold.indices(), &[0, 1, 2]);
        assert!(is_approx_eps(cold.probs()[0], 0.36 / 0.46, 1.0e-5));
        assert!(cold.probs()[0] > 0.6);
        assert_distribution(cold.probs());
        Ok(())
    }

    #[test]
    fn test_temperature_flat() -> Result<(), anyhow::Error> {
        let sampler = TruncationSampler::new(SamplerConfig {
            temperature: 0.05,
            ..Default::default()
        })?;

        let candidates = sampler.truncate(&[0.001; 1000])?;
        assert_eq!(candidates.len(), 1000);
        assert!(candidates.probs().iter().all(|p| p.is_finite()));
        assert_distribution(candidates.probs());
        assert!(candidates.probs().iter().all(|&p| is_approx_eps(p, 0.001, 1.0e-4)));

        let mut rng = fastrand::Rng::with_seed(43);
        let mut probs = (0..1000).map(|_| 0.001 + 0.0001 * rng.f32()).collect_vec();
        probs[7] = 0.002;
        let candidates = sampler.truncate(&probs)?;
        assert!(candidates.probs().iter().all(|p| p.is_finite()));
        assert_distribution(candidates.probs());
        let index = candidates.indices().iter().position(|&x| x == 7).unwrap();
        assert!(candidates.probs()[index] > 0.99);
        Ok(())
    }

    #[test]
    fn test_config_json() -> Result<(), anyhow::Error> {
        let config = SamplerConfig {
            coefficient: 0.05,
            exponent: 1.5,
            temperature: 0.8,
        };
        let json = serde_json::to_string(&config)?;
        assert_eq!(serde_json::from_str::<SamplerConfig>(&json)?, config);

        let config: SamplerConfig = serde_json::from_str(r#"{ "temperature": 0.5 }"#)?;
        assert_eq!(
            config,
            SamplerConfig {
                temperature: 0.5,
                ..Default::default()
            }
        );
        TruncationSampler::new(config)?;

        let config: SamplerConfig = serde_json::from_str(r#"{ "coefficient": -0.1 }"#)?;
        assert!(TruncationSampler::new(config).is_err());
        Ok(())
    }

    #[test]
    fn test_draw() -> Result<(), anyhow::Error> {
        let sampler = TruncationSampler::default();
        let probs = [0.5, 0.25, 0.25];
        assert_eq!(sampler.sample_with(&probs, 0.0)?, 0);
        assert_eq!(sampler.sample_with(&probs, 0.49)?, 0);
        assert_eq!(sampler.sample_with(&probs, 0.5)?, 1);
        assert_eq!(sampler.sample_with(&probs, 0.8)?, 2);
        assert_eq!(sampler.sample_with(&probs, 1.0)?, 2);

        let mut rng = fastrand::Rng::with_seed(41);
        let mut counts = [0usize; 3];
        for _ in 0..10_000 {
            counts[sampler.sample_rng(&probs, &mut rng)?] += 1;
        }
        assert!(counts[0] > 4500 && counts[0] < 5500, "{counts:?}");
        Ok(())
    }

    #[test]
    fn test_errors() {
        let sampler = TruncationSampler::default();
        assert_eq!(sampler.truncate(&[]), Err(SamplerError::Empty));
        assert_eq!(
            sampler.truncate(&[0.5, -0.1, 0.6]),
            Err(SamplerError::InvalidProbability {
                index: 1,
                value: -0.1
            })
        );
        assert!(matches!(
            sampler.truncate(&[0.5, f32::NAN]),
            Err(SamplerError::InvalidProbability { index: 1, .. })
        ));
        assert_eq!(sampler.truncate(&[0.0, 0.0]), Err(SamplerError::ZeroMass));

        let invalid = [
            SamplerConfig {
                coefficient: -1.0,
                ..Default::default()
            },
            SamplerConfig {
                exponent: f32::INFINITY,
                ..Default::default()
            },
            SamplerConfig {
                temperature: 0.0,
                ..Default::default()
            },
        ];
        for config in invalid {
            assert!(TruncationSampler::new(config).is_err());
        }
    }

    #[test]
    fn test_softmax() {
        let probs = softmax(&[1000.0, 1000.0, -1000.0]);
        assert!(is_approx_eps(probs[0], 0.5, 1.0e-6));
        assert_eq!(probs[2], 0.0);
        assert_distribution(&probs);
    }
}
