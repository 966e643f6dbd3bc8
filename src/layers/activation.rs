//! Activation Functions
//!
//! Element-wise nonlinearities used by the recurrent cells and the attention
//! mixing layer.
//!
//! ```text
//! sigmoid(x) = 1 / (1 + exp(-x))      gates of GRU / LSTM cells
//! tanh(x)                              candidate states, attention output
//! ```

use rayon::prelude::*;

use crate::tensor::Tensor;

/// Logistic sigmoid, applied element-wise
pub fn sigmoid(x: &Tensor) -> Tensor {
    let result = x.data.par_iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect();
    Tensor::new(result, x.shape.clone())
}

/// Hyperbolic tangent, applied element-wise
pub fn tanh(x: &Tensor) -> Tensor {
    let result = x.data.par_iter().map(|&v| v.tanh()).collect();
    Tensor::new(result, x.shape.clone())
}
