use derive_getters::Getters;
use itertools::Itertools;

use super::{
    config::MixConfig,
    decay::{BoundaryFactor, DecayKernel, ExponentialDecay, OutputFactor, Unit},
    shift::TokenShift,
    ModelError,
};
use crate::tensor::{
    ops::{sigmoid, CausalSoftmax},
    Matrix, Shape, TensorCpu, TensorError,
};

/// Projections of a [`TimeMix`] layer, each of shape `[C, C, 1, 1]`.
#[derive(Debug, Clone)]
pub struct TimeMixWeights {
    pub key: Matrix,
    pub value: Matrix,
    pub receptance: Matrix,
    pub output: Matrix,
}

impl TimeMixWeights {
    pub fn random(rng: &mut fastrand::Rng, num_emb: usize) -> Self {
        let scale = (num_emb as f32).sqrt().recip();
        Self {
            key: Matrix::random(rng, num_emb, num_emb, scale),
            value: Matrix::random(rng, num_emb, num_emb, scale),
            receptance: Matrix::random(rng, num_emb, num_emb, scale),
            output: Matrix::random(rng, num_emb, num_emb, scale),
        }
    }
}

/// Causal, distance-decayed linear attention gated by the receptance.
///
/// ```text
/// TM_{t,c} = γ(t) · W_o[ σ(R_{t,c}) · Σ_{u<=t} f_h(t-u) α_h(u) β_h(t) · softmax_t(K_{u,c}) · V_{u,c} ]
/// ```
#[derive(Debug, Getters)]
pub struct TimeMix {
    num_emb: usize,
    num_head: usize,
    shift: TokenShift,
    weights: TimeMixWeights,
    decay: Box<dyn DecayKernel>,
    alpha: Box<dyn BoundaryFactor>,
    beta: Box<dyn BoundaryFactor>,
    gamma: Box<dyn OutputFactor>,
}

impl TimeMix {
    /// Create a layer with geometric exponential decay and unit boundary factors.
    pub fn new(config: &MixConfig, weights: TimeMixWeights) -> Result<Self, ModelError> {
        config.validate()?;
        let num_emb = config.num_emb;
        let expected = Shape::new(num_emb, num_emb, 1, 1);
        for matrix in [
            &weights.key,
            &weights.value,
            &weights.receptance,
            &weights.output,
        ] {
            if matrix.shape() != expected {
                return Err(TensorError::Shape(matrix.shape(), expected).into());
            }
        }

        Ok(Self {
            num_emb,
            num_head: config.num_head,
            shift: config.time_shift.try_into()?,
            weights,
            decay: Box::new(ExponentialDecay::geometric(config.num_head)?),
            alpha: Box::new(Unit),
            beta: Box::new(Unit),
            gamma: Box::new(Unit),
        })
    }

    fn check_heads(&self, name: &str, num_head: Option<usize>) -> Result<(), ModelError> {
        match num_head {
            Some(num_head) if num_head != self.num_head => Err(ModelError::InvalidConfig(format!(
                "{name} covers {num_head} heads, layer has {}",
                self.num_head
            ))),
            _ => Ok(()),
        }
    }

    pub fn with_decay(mut self, decay: impl DecayKernel + 'static) -> Result<Self, ModelError> {
        self.check_heads("decay kernel", decay.num_head())?;
        self.decay = Box::new(decay);
        Ok(self)
    }

    pub fn with_alpha(mut self, alpha: impl BoundaryFactor + 'static) -> Result<Self, ModelError> {
        self.check_heads("alpha", alpha.num_head())?;
        self.alpha = Box::new(alpha);
        Ok(self)
    }

    pub fn with_beta(mut self, beta: impl BoundaryFactor + 'static) -> Result<Self, ModelError> {
        self.check_heads("beta", beta.num_head())?;
        self.beta = Box::new(beta);
        Ok(self)
    }

    pub fn with_gamma(mut self, gamma: impl OutputFactor + 'static) -> Self {
        self.gamma = Box::new(gamma);
        self
    }

    pub fn with_shift(mut self, shift: TokenShift) -> Self {
        self.shift = shift;
        self
    }

    #[inline]
    pub fn head_size(&self) -> usize {
        self.num_emb / self.num_head
    }

    /// The longest sequence all lookup tables can serve.
    pub fn ctx_len(&self) -> Option<usize> {
        [
            self.decay.ctx_len(),
            self.alpha.ctx_len(),
            self.beta.ctx_len(),
            self.gamma.ctx_len(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// The mixing weight `W_{t,u}` of a head; zero if `source` lies after `target`.
    pub fn weight(&self, head: usize, target: usize, source: usize) -> f32 {
        if source > target {
            return 0.0;
        }
        self.decay.decay(head, target - source)
            * self.alpha.factor(head, source)
            * self.beta.factor(head, target)
    }

    /// Run the layer over `input` of shape `[C, T, B, 1]`.
    pub fn forward(&self, input: &TensorCpu<f32>) -> Result<TensorCpu<f32>, ModelError> {
        let shape = input.shape();
        let (num_emb, num_token, num_batch) =
            (shape.num_emb(), shape.num_token(), shape.num_batch());
        input.check_shape(Shape::new(self.num_emb, num_token, num_batch, 1))?;
        if !input.is_finite() {
            return Err(ModelError::NonFinite("time-mix input"));
        }
        if let Some(ctx_len) = self.ctx_len().filter(|&len| num_token > len) {
            return Err(ModelError::ContextOverflow {
                len: num_token,
                ctx_len,
            });
        }
        log::trace!("time-mix forward: {shape}");

        let x = self.shift.forward(input);
        let k = self.weights.key.matmul(&x)?;
        let v = self.weights.value.matmul(&x)?;
        let r = self.weights.receptance.matmul(&x)?;
        if !(k.is_finite() && v.is_finite() && r.is_finite()) {
            return Err(ModelError::NonFinite("time-mix projection"));
        }

        let softmax = CausalSoftmax::new(&k);
        let head_size = self.head_size();
        // lower triangle of `W_{t,u}` per head: row `t` holds sources `0..=t`
        let weights = (0..self.num_head)
            .map(|head| {
                (0..num_token)
                    .map(|target| {
                        (0..=target)
                            .map(|source| self.weight(head, target, source))
                            .collect_vec()
                    })
                    .collect_vec()
            })
            .collect_vec();

        let mut wkv = TensorCpu::zeros(shape);
        for (batch, token, channel) in
            itertools::iproduct!(0..num_batch, 0..num_token, 0..num_emb)
        {
            let head = channel / head_size;
            let weights = &weights[head][token];
            let accum = softmax.accum(channel, token, batch);
            let sum: f32 = (0..=token)
                .map(|source| {
                    let index = Shape::new(channel, source, batch, 0);
                    weights[source] * accum.weight(k[index]) * v[index]
                })
                .sum();
            let index = Shape::new(channel, token, batch, 0);
            wkv[index] = sigmoid(r[index]) * sum;
        }

        let mut output = self.weights.output.matmul(&wkv)?;
        for (batch, token) in itertools::iproduct!(0..num_batch, 0..num_token) {
            let gamma = self.gamma.factor(token);
            output.vector_mut(token, batch).iter_mut().for_each(|x| *x *= gamma);
        }

        if !output.is_finite() {
            return Err(ModelError::NonFinite("time-mix output"));
        }
        Ok(output)
    }
}
