use super::{Shape, TensorCpu, TensorError};

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// GeLU with the `tanh` approximation.
#[inline]
pub fn gelu(x: f32) -> f32 {
    const COEFF: f32 = 0.044_715;
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    let x_cubed = x * x * x;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + COEFF * x_cubed)).tanh())
}

/// Running `(max, sum)` of a softmax whose support grows one element at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftmaxAccum {
    pub max: f32,
    pub sum: f32,
}

impl Default for SoftmaxAccum {
    fn default() -> Self {
        Self {
            max: f32::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl SoftmaxAccum {
    /// Fold one more logit into the accumulator, rescaling the sum if the max moves.
    #[inline]
    pub fn push(self, x: f32) -> Self {
        if x > self.max {
            let sum = self.sum * (self.max - x).exp() + 1.0;
            Self { max: x, sum }
        } else {
            let sum = self.sum + (x - self.max).exp();
            Self { max: self.max, sum }
        }
    }

    /// Normalized weight of logit `x` under the current support.
    #[inline]
    pub fn weight(&self, x: f32) -> f32 {
        (x - self.max).exp() / self.sum
    }
}

/// Per-position softmax statistics of `K` (`[C, T, B, 1]`) over the causal window `u <= t`.
#[derive(Debug, Clone)]
pub struct CausalSoftmax {
    shape: Shape,
    accum: Vec<SoftmaxAccum>,
}

impl CausalSoftmax {
    pub fn new(k: &TensorCpu<f32>) -> Self {
        let shape = k.shape();
        let [num_emb, num_token, num_batch, _] = *shape;

        let mut accum = vec![SoftmaxAccum::default(); shape.len()];
        for batch in 0..num_batch {
            for channel in 0..num_emb {
                (0..num_token).fold(SoftmaxAccum::default(), |acc, token| {
                    let index = Shape::new(channel, token, batch, 0);
                    let acc = acc.push(k[index]);
                    accum[shape.shape_index(index)] = acc;
                    acc
                });
            }
        }
        Self { shape, accum }
    }

    #[inline]
    pub fn accum(&self, channel: usize, token: usize, batch: usize) -> SoftmaxAccum {
        self.accum[self.shape.shape_index(Shape::new(channel, token, batch, 0))]
    }

    /// `softmax_t(K_{u,c})`; zero outside the causal window.
    pub fn weight(
        &self,
        k: &TensorCpu<f32>,
        channel: usize,
        source: usize,
        target: usize,
        batch: usize,
    ) -> f32 {
        if source > target {
            return 0.0;
        }
        let x = k[Shape::new(channel, source, batch, 0)];
        self.accum(channel, target, batch).weight(x)
    }
}

impl TensorCpu<f32> {
    pub fn sigmoid(&self) -> Self {
        self.map(sigmoid)
    }

    pub fn gelu(&self) -> Self {
        self.map(gelu)
    }

    /// Element-wise product with a tensor of the same shape.
    pub fn try_mul(&self, other: &Self) -> Result<Self, TensorError> {
        other.check_shape(self.shape)?;
        let data = Iterator::zip(self.data.iter(), other.data.iter())
            .map(|(x, y)| x * y)
            .collect();
        Ok(Self {
            shape: self.shape,
            data,
        })
    }

    /// Element-wise sum with a tensor of the same shape.
    pub fn try_add(&self, other: &Self) -> Result<Self, TensorError> {
        other.check_shape(self.shape)?;
        let data = Iterator::zip(self.data.iter(), other.data.iter())
            .map(|(x, y)| x + y)
            .collect();
        Ok(Self {
            shape: self.shape,
            data,
        })
    }

    /// Normalize each channel vector, then apply weight and bias of shape `[C, 1, 1, 1]`.
    pub fn layer_norm(&self, w: &Self, b: &Self, eps: f32) -> Result<Self, TensorError> {
        let num_emb = self.shape[0];
        let shape = Shape::new(num_emb, 1, 1, 1);
        w.check_shape(shape)?;
        b.check_shape(shape)?;

        let mut data = Vec::with_capacity(self.data.len());
        for x in self.data.chunks_exact(num_emb) {
            let mean = x.iter().sum::<f32>() / num_emb as f32;
            let variance = x.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / num_emb as f32;
            let deviation = (variance + eps).sqrt();
            data.extend(
                itertools::izip!(x, &w.data, &b.data).map(|(x, w, b)| (x - mean) / deviation * w + b),
            );
        }
        Ok(Self {
            shape: self.shape,
            data,
        })
    }

    /// Returns `false` if any element is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::{gelu, sigmoid, CausalSoftmax, SoftmaxAccum};
    use crate::tensor::{Shape, TensorCpu};

    fn is_approx_eps(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() <= f32::max(eps, f32::max(a.abs(), b.abs()) * eps)
    }

    #[test]
    fn test_activations() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(is_approx_eps(sigmoid(2.0) + sigmoid(-2.0), 1.0, 1.0e-6));
        assert_eq!(gelu(0.0), 0.0);
        assert!(is_approx_eps(gelu(1.0), 0.841_192, 1.0e-4));
        assert!(is_approx_eps(gelu(-1.0), -0.158_808, 1.0e-4));
        assert!(gelu(-10.0).abs() < 1.0e-6);
    }

    #[test]
    fn test_softmax_accum() {
        let x = [3.0, -1.0, 100.0, 0.5, 99.0];
        let acc = x.iter().fold(SoftmaxAccum::default(), |acc, &x| acc.push(x));
        assert_eq!(acc.max, 100.0);

        let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let sum: f32 = x.iter().map(|x| (x - max).exp()).sum();
        for &x in &x {
            let answer = (x - max).exp() / sum;
            assert!(is_approx_eps(acc.weight(x), answer, 1.0e-6));
        }
    }

    #[test]
    fn test_causal_softmax() -> Result<(), anyhow::Error> {
        const C: usize = 5;
        const T: usize = 9;
        const B: usize = 2;

        let k = [(); C * T * B]
            .map(|_| 80.0 * (fastrand::f32() - 0.5))
            .to_vec();
        let k = TensorCpu::from_data(Shape::new(C, T, B, 1), k)?;
        let softmax = CausalSoftmax::new(&k);

        for (batch, channel, target) in itertools::iproduct!(0..B, 0..C, 0..T) {
            let weights = (0..T)
                .map(|source| softmax.weight(&k, channel, source, target, batch))
                .collect_vec();
            let sum: f32 = weights.iter().sum();
            assert!(
                is_approx_eps(sum, 1.0, 1.0e-5),
                "window {target} of channel {channel} sums to {sum}"
            );
            assert!(weights[target + 1..].iter().all(|&w| w == 0.0));
            assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0));
        }

        // the first position only sees itself
        for channel in 0..C {
            assert_eq!(softmax.weight(&k, channel, 0, 0, 0), 1.0);
        }
        Ok(())
    }

    #[test]
    fn test_layer_norm() -> Result<(), anyhow::Error> {
        const C: usize = 100;
        const T: usize = 3;

        let x = [(); C * T].map(|_| 10.0 * (fastrand::f32() - 0.5)).to_vec();
        let w = [(); C].map(|_| fastrand::f32() - 0.5).to_vec();
        let b = [(); C].map(|_| fastrand::f32() - 0.5).to_vec();

        let x = TensorCpu::from_data(Shape::new(C, T, 1, 1), x)?;
        let w = TensorCpu::from_data(Shape::new(C, 1, 1, 1), w)?;
        let b = TensorCpu::from_data(Shape::new(C, 1, 1, 1), b)?;
        let y = x.layer_norm(&w, &b, 1.0e-5)?;

        for token in 0..T {
            let x = x.vector(token, 0);
            let mean = x.iter().sum::<f32>() / C as f32;
            let squared = x.iter().map(|x| x.powi(2)).sum::<f32>() / C as f32;
            let deviation = (squared - mean.powi(2) + 1.0e-5).sqrt();
            for (channel, &y) in y.vector(token, 0).iter().enumerate() {
                let answer = (x[channel] - mean) / deviation * w.data()[channel] + b.data()[channel];
                assert!(
                    is_approx_eps(y, answer, 1.0e-3),
                    "failed at {channel}: {y} vs. {answer}"
                );
            }
        }

        let bad = TensorCpu::<f32>::zeros(Shape::new(C + 1, 1, 1, 1));
        assert!(x.layer_norm(&bad, &b, 1.0e-5).is_err());
        Ok(())
    }
}
