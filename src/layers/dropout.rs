//! Dropout Layer
//!
//! Randomly zeros activations in training mode and rescales the survivors by
//! `1 / (1 - rate)`. In evaluation mode it passes values through unchanged and
//! consumes no randomness.

use rand::Rng;

use crate::tensor::Tensor;

/// Dropout layer
#[derive(Clone, Debug)]
pub struct Dropout {
    pub rate: f32,
    pub training: bool,
}

impl Dropout {
    /// Create a new dropout layer in evaluation mode
    ///
    /// # Arguments
    ///
    /// * `rate` - Dropout probability (0.0 = no dropout, 1.0 = drop all)
    pub fn new(rate: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&rate),
            "Dropout rate must be between 0.0 and 1.0"
        );
        Self {
            rate,
            training: false,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor
    /// * `rng` - Source of the keep/drop decisions
    pub fn forward<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> Tensor {
        if !self.training || self.rate == 0.0 {
            return x.clone();
        }

        if self.rate >= 1.0 {
            return Tensor::zeros(x.shape.clone());
        }

        let scale = 1.0 / (1.0 - self.rate);
        let mut output = Tensor::zeros(x.shape.clone());
        for (out, &val) in output.data.iter_mut().zip(&x.data) {
            if rng.random::<f32>() > self.rate {
                *out = val * scale;
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_eval_mode_is_identity() {
        let dropout = Dropout::new(0.5);
        let x = Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(dropout.forward(&x, &mut rng), x);
    }

    #[test]
    fn test_training_mode_zeroes_or_scales() {
        let mut dropout = Dropout::new(0.5);
        dropout.training = true;
        let x = Tensor::full(vec![4, 32], 1.0);
        let mut rng = StdRng::seed_from_u64(42);
        let y = dropout.forward(&x, &mut rng);
        assert!(y.data.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(y.data.iter().any(|&v| v == 0.0));
        assert!(y.data.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_full_rate_drops_everything() {
        let mut dropout = Dropout::new(1.0);
        dropout.training = true;
        let x = Tensor::full(vec![2, 2], 3.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(dropout.forward(&x, &mut rng).data.iter().all(|&v| v == 0.0));
    }
}
