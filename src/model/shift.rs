use super::{config::ShiftConfig, ModelError};
use crate::tensor::{Shape, TensorCpu};

/// Token-shift: the leading channels of position `t` are kept, the trailing ones are taken from
/// position `t - distance`. Positions before the start of the sequence read as zeros.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenShift {
    fraction: f32,
    distance: usize,
}

impl Default for TokenShift {
    fn default() -> Self {
        Self {
            fraction: 0.5,
            distance: 1,
        }
    }
}

impl TryFrom<ShiftConfig> for TokenShift {
    type Error = ModelError;

    fn try_from(config: ShiftConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self {
            fraction: config.fraction,
            distance: config.distance,
        })
    }
}

impl TokenShift {
    pub fn new(fraction: f32, distance: usize) -> Result<Self, ModelError> {
        ShiftConfig { fraction, distance }.try_into()
    }

    #[inline]
    pub fn fraction(&self) -> f32 {
        self.fraction
    }

    #[inline]
    pub fn distance(&self) -> usize {
        self.distance
    }

    /// Number of trailing channels that come from the past.
    #[inline]
    pub fn num_shifted(&self, num_emb: usize) -> usize {
        ((num_emb as f32 * self.fraction).floor() as usize).min(num_emb)
    }

    pub fn forward(&self, input: &TensorCpu<f32>) -> TensorCpu<f32> {
        let shape = input.shape();
        let (num_emb, num_token, num_batch) =
            (shape.num_emb(), shape.num_token(), shape.num_batch());
        let split = num_emb - self.num_shifted(num_emb);
        if split == num_emb && self.fraction > 0.0 {
            log::warn!(
                "token shift of fraction {} shifts no channel of {num_emb}",
                self.fraction
            );
        }

        let mut output = TensorCpu::zeros(Shape::new(num_emb, num_token, num_batch, 1));
        for batch in 0..num_batch {
            for token in 0..num_token {
                let x = output.vector_mut(token, batch);
                x[..split].copy_from_slice(&input.vector(token, batch)[..split]);
                if let Some(past) = token.checked_sub(self.distance) {
                    x[split..].copy_from_slice(&input.vector(past, batch)[split..]);
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::TokenShift;
    use crate::tensor::{Shape, TensorCpu};

    fn sequence(num_emb: usize, num_token: usize, num_batch: usize) -> TensorCpu<f32> {
        let shape = Shape::new(num_emb, num_token, num_batch, 1);
        let data = (0..shape.len()).map(|x| x as f32 + 1.0).collect();
        TensorCpu::from_data(shape, data).unwrap()
    }

    #[test]
    fn test_half_shift() {
        let x = sequence(4, 3, 2);
        let y = TokenShift::default().forward(&x);
        assert_eq!(y.shape(), x.shape());

        for batch in 0..2 {
            // zero padded at the first position
            assert_eq!(&y.vector(0, batch)[..2], &x.vector(0, batch)[..2]);
            assert_eq!(&y.vector(0, batch)[2..], &[0.0, 0.0]);
            for token in 1..3 {
                assert_eq!(&y.vector(token, batch)[..2], &x.vector(token, batch)[..2]);
                assert_eq!(&y.vector(token, batch)[2..], &x.vector(token - 1, batch)[2..]);
            }
        }
    }

    #[test]
    fn test_odd_width() -> Result<(), anyhow::Error> {
        let x = sequence(5, 2, 1);
        let shift = TokenShift::default();
        assert_eq!(shift.num_shifted(5), 2);

        let y = shift.forward(&x);
        assert_eq!(y.vector(1, 0), &[6.0, 7.0, 8.0, 4.0, 5.0]);
        Ok(())
    }

    #[test]
    fn test_distance_and_fraction() -> Result<(), anyhow::Error> {
        let x = sequence(4, 4, 1);

        let y = TokenShift::new(0.25, 2)?.forward(&x);
        assert_eq!(y.vector(0, 0), &[1.0, 2.0, 3.0, 0.0]);
        assert_eq!(y.vector(1, 0), &[5.0, 6.0, 7.0, 0.0]);
        assert_eq!(y.vector(3, 0), &[13.0, 14.0, 15.0, 8.0]);

        assert_eq!(TokenShift::new(0.0, 1)?.forward(&x), x);

        let y = TokenShift::new(1.0, 1)?.forward(&x);
        assert_eq!(y.vector(0, 0), &[0.0; 4]);
        assert_eq!(y.vector(2, 0), x.vector(1, 0));

        assert!(TokenShift::new(2.0, 1).is_err());
        assert!(TokenShift::new(0.5, 0).is_err());
        Ok(())
    }
}
