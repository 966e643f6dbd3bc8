//! Sequence Decoder
//!
//! The decoder turns an encoded input into an output symbol sequence one step
//! at a time. Each step embeds the current input symbol, advances the
//! recurrent state, updates the auxiliary stack, attends over the encoder
//! outputs and projects the composed features to a distribution over the
//! vocabulary.
//!
//! ## Architecture Overview
//!
//! ```text
//! input symbols [batch]
//!     ↓
//! Embedding + input dropout          → embedded [batch, input]
//!     ↓
//! RecurrentCell (GRU / LSTM stack)   → output [batch, hidden], new state
//!     ↓
//! AuxiliaryStack update              → grammar context | parent embedding
//!     ↓
//! Attention (optional)               → augmented output, weights [batch, source]
//!     ↓
//! FeatureComposer                    → scores [batch, vocab]
//!     ↓
//! Normalizer                         → step output
//! ```
//!
//! ## Control Flow
//!
//! A decode call draws once from the caller's random source to decide whether
//! the whole call is teacher forced. Teacher-forced calls feed the target
//! symbols; free-running calls feed back their own argmax, optionally through
//! a constraint mask. See [`Decoder::decode`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use rand::{rngs::StdRng, SeedableRng};
//! use stackdec::{DecodeInputs, Decoder, DecoderConfig, HiddenState, Tensor};
//!
//! let config = DecoderConfig::tiny(32, 0, 1);
//! let decoder = Decoder::new(config, 42)?;
//!
//! let encoder_hidden = HiddenState::new(Tensor::zeros(vec![1, 4, 16]));
//! let mut rng = StdRng::seed_from_u64(7);
//! let out = decoder.decode(&DecodeInputs::new().encoder_hidden(&encoder_hidden), &mut rng)?;
//! println!("{:?}", out.sequences());
//! ```

mod output;
mod run;
mod step;

pub use output::{DecodeInputs, DecodeOutput, DecodeSummary, LengthTracker};
pub use step::{StepAux, StepOutput};

use std::sync::Arc;

use tracing::info;

use crate::composer::{FeatureComposer, FeatureLayout};
use crate::config::{DecoderConfig, RnnKind, StackConfig};
use crate::error::{DecoderError, Result};
use crate::layers::{Attention, Dropout, Embedding, Gru, Linear, Lstm, RecurrentCell};
use crate::stack::{BracketConstraint, ConstraintMask, GrammarComposer};

/// Step-wise decoder
///
/// Holds the model parameters and the static configuration. Per-call state
/// (hidden state, stacks, lengths) lives only for the duration of
/// [`Decoder::decode`].
pub struct Decoder {
    config: DecoderConfig,
    embedding: Embedding,
    input_dropout: Dropout,
    rnn: Box<dyn RecurrentCell>,
    stack_embedding: Option<Embedding>,
    grammar: Option<GrammarComposer>,
    attention: Option<Attention>,
    composer: FeatureComposer,
    constraint: Option<Arc<dyn ConstraintMask>>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("config", &self.config)
            .field("constraint", &self.constraint)
            .finish_non_exhaustive()
    }
}

impl Decoder {
    /// Create a randomly initialized decoder
    ///
    /// # Arguments
    ///
    /// * `config` - Static configuration, validated here
    /// * `seed` - Seed for every parameter initialization
    pub fn new(config: DecoderConfig, seed: u64) -> Result<Self> {
        DecoderBuilder::new(config).seed(seed).build()
    }

    pub fn builder(config: DecoderConfig) -> DecoderBuilder {
        DecoderBuilder::new(config)
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Width of the composed feature vector
    pub fn feature_width(&self) -> usize {
        self.composer.layout().width()
    }

    /// Enable dropout
    pub fn train(&mut self) {
        self.set_training(true);
    }

    /// Disable dropout (the default)
    pub fn eval(&mut self) {
        self.set_training(false);
    }

    fn set_training(&mut self, training: bool) {
        self.input_dropout.training = training;
        self.rnn.set_training(training);
    }
}

/// Assembles a [`Decoder`], choosing every optional component once
///
/// Components not supplied explicitly are randomly initialized from the seed.
pub struct DecoderBuilder {
    config: DecoderConfig,
    seed: u64,
    cell: Option<Box<dyn RecurrentCell>>,
    embedding: Option<Embedding>,
    stack_embedding: Option<Embedding>,
    projection: Option<Linear>,
    constraint: Option<Arc<dyn ConstraintMask>>,
}

impl DecoderBuilder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            seed: 0,
            cell: None,
            embedding: None,
            stack_embedding: None,
            projection: None,
            constraint: None,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Use a custom recurrent cell
    pub fn cell(mut self, cell: Box<dyn RecurrentCell>) -> Self {
        self.cell = Some(cell);
        self
    }

    /// Input embedding table [vocab_size, input_size]
    pub fn embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Stack symbol embedding table [vocab_size, hidden_size]
    pub fn stack_embedding(mut self, embedding: Embedding) -> Self {
        self.stack_embedding = Some(embedding);
        self
    }

    /// Output projection [feature_width, vocab_size]
    pub fn projection(mut self, projection: Linear) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Mask policy for constrained decoding
    ///
    /// Defaults to a [`BracketConstraint`] over the configured symbol classes.
    pub fn constraint(mut self, constraint: Arc<dyn ConstraintMask>) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn build(self) -> Result<Decoder> {
        let config = self.config;
        config.validate()?;
        let seed = self.seed;

        let rnn = match self.cell {
            Some(cell) => cell,
            None => match config.rnn_cell {
                RnnKind::Gru => Box::new(Gru::new(
                    config.input_size,
                    config.hidden_size,
                    config.n_layers,
                    config.dropout,
                    seed,
                )) as Box<dyn RecurrentCell>,
                RnnKind::Lstm => Box::new(Lstm::new(
                    config.input_size,
                    config.hidden_size,
                    config.n_layers,
                    config.dropout,
                    seed,
                )),
            },
        };
        DecoderError::check_width("recurrent cell input", config.input_size, rnn.input_size())?;
        DecoderError::check_width("recurrent cell hidden", config.hidden_size, rnn.hidden_size())?;
        DecoderError::check_width("recurrent cell layers", config.n_layers, rnn.n_layers())?;

        let embedding = self
            .embedding
            .unwrap_or_else(|| Embedding::new(config.vocab_size, config.input_size, seed + 100));
        DecoderError::check_width("embedding vocabulary", config.vocab_size, embedding.vocab_size())?;
        DecoderError::check_width("embedding width", config.input_size, embedding.dim())?;

        let stack_embedding = match config.stack {
            StackConfig::None => None,
            _ => {
                let table = self
                    .stack_embedding
                    .unwrap_or_else(|| Embedding::new(config.vocab_size, config.hidden_size, seed + 200));
                DecoderError::check_width("stack embedding vocabulary", config.vocab_size, table.vocab_size())?;
                DecoderError::check_width("stack embedding width", config.hidden_size, table.dim())?;
                Some(table)
            }
        };

        let grammar = match config.stack {
            StackConfig::Grammar { composition, .. } => {
                Some(GrammarComposer::new(composition, config.hidden_size, seed + 300))
            }
            _ => None,
        };

        let attention = config
            .attention
            .as_ref()
            .map(|attn| Attention::new(attn, config.hidden_size, seed + 400));

        let layout = FeatureLayout::from_config(&config);
        let projection = self
            .projection
            .unwrap_or_else(|| Linear::new(layout.width(), config.vocab_size, seed + 500));
        let composer = FeatureComposer::new(layout, projection)?;
        DecoderError::check_width("output projection vocabulary", config.vocab_size, composer.vocab_size())?;

        let constraint = match (config.constrained, self.constraint) {
            (true, Some(policy)) => Some(policy),
            (true, None) => Some(Arc::new(BracketConstraint::new(
                &config.symbols,
                config.sos_id,
                config.eos_id,
            )) as Arc<dyn ConstraintMask>),
            (false, Some(_)) => {
                return Err(DecoderError::config(
                    "a constraint mask was supplied but constrained decoding is off",
                ))
            }
            (false, None) => None,
        };

        info!(
            grammar = matches!(config.stack, StackConfig::Grammar { .. }),
            parent = matches!(config.stack, StackConfig::Parent { .. }),
            attention = ?config.attention.map(|a| a.strategy),
            constrained = config.constrained,
            feature_width = layout.width(),
            "decoder built"
        );

        Ok(Decoder {
            input_dropout: Dropout::new(config.input_dropout),
            config,
            embedding,
            rnn,
            stack_embedding,
            grammar,
            attention,
            composer,
            constraint,
        })
    }
}
