//! Neural Network Layers
//!
//! The numeric building blocks the decoder composes at every step. These are
//! forward-only: training, losses and optimizers live outside this crate.
//!
//! ## Layers
//!
//! - **activation**: sigmoid and tanh
//! - **linear**: Fully connected layer
//! - **embedding**: Symbol embedding lookup
//! - **dropout**: Dropout regularization (training mode only)
//! - **recurrent**: GRU / LSTM stacks behind the `RecurrentCell` trait
//! - **attention**: Attention strategies over encoder outputs

pub mod activation;
pub mod attention;
pub mod dropout;
pub mod embedding;
pub mod linear;
pub mod recurrent;

// Re-export main types for convenience
pub use activation::{sigmoid, tanh};
pub use attention::{Alignment, Attention, AttentionOutput, Scorer};
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use linear::{random_init, Linear};
pub use recurrent::{Gru, GruLayer, HiddenState, Lstm, LstmLayer, RecurrentCell};
