//! Linear Layer (Fully Connected)
//!
//! Performs the affine transformation used for gate projections, attention
//! mixing and the final projection to vocabulary scores:
//!
//! ```text
//! Input:  x [batch, in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]
//! Output: y = x @ W + b [batch, out_features]
//! ```
//!
//! Weights use a uniform He-scaled initialization from a seeded LCG so that two
//! decoders built with the same seed are identical.

use crate::error::{DecoderError, Result};
use crate::tensor::Tensor;

/// Helper function for random initialization
///
/// Uses a simple LCG (Linear Congruential Generator) for reproducible initialization.
/// The scale parameter controls the magnitude of initial weights.
pub fn random_init(size: usize, seed: u64, scale: f32) -> Vec<f32> {
    let mut rng = seed;
    (0..size)
        .map(|_| {
            rng = rng.wrapping_mul(1103515245).wrapping_add(12345);
            let val = ((rng / 65536) % 32768) as f32 / 32768.0;
            (val - 0.5) * 2.0 * scale
        })
        .collect()
}

/// Linear layer
///
/// Performs y = x @ W + b where:
/// - W: weight matrix [in_features, out_features]
/// - b: bias vector [out_features]
#[derive(Clone, Debug)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Linear {
    /// Create a new linear layer with He initialization
    ///
    /// # Arguments
    ///
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `seed` - Random seed for reproducibility
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        let scale = (2.0 / in_features as f32).sqrt();
        Self {
            weight: Tensor::new(
                random_init(in_features * out_features, seed, scale),
                vec![in_features, out_features],
            ),
            bias: Tensor::zeros(vec![out_features]),
        }
    }

    /// Build a layer from explicit parameters
    ///
    /// `weight` must be `[in_features, out_features]` and `bias` `[out_features]`.
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        if weight.shape.len() != 2 {
            return Err(DecoderError::Capability(format!(
                "linear weight must be 2D, got shape {:?}",
                weight.shape
            )));
        }
        DecoderError::check_width("linear bias", weight.shape[1], bias.data.len())?;
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape[1]
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, in_features]
    ///
    /// # Returns
    ///
    /// Output tensor [batch, out_features]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        x.matmul(&self.weight).add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_init_is_reproducible() {
        assert_eq!(random_init(16, 7, 0.5), random_init(16, 7, 0.5));
        assert_ne!(random_init(16, 7, 0.5), random_init(16, 8, 0.5));
        assert!(random_init(64, 3, 0.5).iter().all(|v| v.abs() <= 0.5));
    }

    #[test]
    fn test_forward_adds_bias() {
        let layer = Linear::from_parts(
            Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]),
            Tensor::new(vec![0.5, -0.5], vec![2]),
        )
        .unwrap();
        let y = layer.forward(&Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]));
        assert_eq!(y.data, vec![4.5, 4.5]);
    }

    #[test]
    fn test_from_parts_rejects_bad_bias() {
        let err = Linear::from_parts(Tensor::zeros(vec![3, 2]), Tensor::zeros(vec![3]));
        assert!(matches!(err, Err(DecoderError::ShapeMismatch { .. })));
    }
}
