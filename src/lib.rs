//! Stackdec: Step-wise Sequence Decoder for Seq2seq Parsing
//!
//! A recurrent decoder that generates a linearized parse one symbol at a time
//! from an encoded sentence. Each step can be conditioned on attention over
//! the encoder outputs and on auxiliary symbolic state: a grammar stack that
//! composes a derivation context, or a parent stack that tracks the open
//! constituent and can mask ill-formed continuations.
//!
//! # Modules
//!
//! - [`tensor`] - Minimal row-major tensor
//! - [`layers`] - Embedding, linear, dropout, recurrent cells, attention
//! - [`stack`] - Parent / grammar stacks, input position tracking, masks
//! - [`composer`] - Feature concatenation and vocabulary projection
//! - [`decoder`] - Step function and decoding loop
//! - [`config`] - Static decoder configuration
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use rand::{rngs::StdRng, SeedableRng};
//! use stackdec::{DecodeInputs, Decoder, DecoderConfig, HiddenState, Tensor};
//!
//! let decoder = Decoder::new(DecoderConfig::tiny(32, 0, 1), 42)?;
//! let encoder_hidden = HiddenState::new(Tensor::zeros(vec![1, 2, 16]));
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let out = decoder.decode(&DecodeInputs::new().encoder_hidden(&encoder_hidden), &mut rng)?;
//! assert_eq!(out.lengths.len(), 2);
//! ```

pub mod composer;
pub mod config;
pub mod decoder;
pub mod error;
pub mod layers;
pub mod stack;
pub mod tensor;

// Re-export main types for convenience
pub use composer::{FeatureComposer, FeatureLayout, Normalizer};
pub use config::{
    AttentionConfig, AttentionScoring, AttentionStrategyKind, DecoderConfig, GrammarComposition, RnnKind,
    StackConfig, SymbolClasses,
};
pub use decoder::{DecodeInputs, DecodeOutput, DecodeSummary, Decoder, DecoderBuilder, StepAux, StepOutput};
pub use error::{DecoderError, Result};
pub use layers::{HiddenState, RecurrentCell};
pub use stack::{AuxiliaryStack, BracketConstraint, ConstraintMask, MaskState};
pub use tensor::Tensor;
