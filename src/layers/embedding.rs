//! Token Embedding
//!
//! Lookup table mapping symbol ids to dense vectors:
//!
//! ```text
//! Input:  [batch]            (symbol ids, one per example)
//! Output: [batch, dim]       (embedding vectors)
//! ```
//!
//! The decoder owns two of these: one for the recurrent input and, when a
//! grammar or parent stack is active, one for the stack features.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::error::{DecoderError, Result};
use crate::tensor::Tensor;

#[derive(Clone, Debug)]
pub struct Embedding {
    /// Embedding weight matrix: [vocab_size, dim]
    pub weight: Tensor,
}

impl Embedding {
    /// Create a new embedding table with weights drawn from N(0, 0.1)
    pub fn new(vocab_size: usize, dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 0.1).expect("constant standard deviation is valid");
        let weight_data: Vec<f32> = (0..vocab_size * dim)
            .map(|_| normal.sample(&mut rng))
            .collect();

        Self {
            weight: Tensor::new(weight_data, vec![vocab_size, dim]),
        }
    }

    /// Wrap an explicit `[vocab_size, dim]` table
    pub fn from_weight(weight: Tensor) -> Result<Self> {
        if weight.shape.len() != 2 {
            return Err(DecoderError::Capability(format!(
                "embedding table must be 2D, got shape {:?}",
                weight.shape
            )));
        }
        Ok(Self { weight })
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn dim(&self) -> usize {
        self.weight.shape[1]
    }

    /// Look up one embedding per symbol
    ///
    /// # Panics
    ///
    /// Panics if a symbol id is outside the table
    pub fn forward(&self, symbols: &[usize]) -> Tensor {
        let dim = self.dim();
        let mut output = Vec::with_capacity(symbols.len() * dim);

        for &symbol in symbols {
            assert!(
                symbol < self.vocab_size(),
                "Symbol id {} out of vocab range (vocab_size = {})",
                symbol,
                self.vocab_size()
            );
            output.extend_from_slice(self.weight.row(symbol));
        }

        Tensor::new(output, vec![symbols.len(), dim])
    }
}
