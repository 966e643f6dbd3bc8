//! Decoder Configuration
//!
//! Static configuration of a [`crate::Decoder`]. Everything here is fixed at
//! construction: which auxiliary stack is active, which attention strategy is
//! used, how grammar contexts are composed and whether decoding is constrained.
//! None of it can change in the middle of a decode call.
//!
//! ## Loading
//!
//! ```rust,ignore
//! use stackdec::DecoderConfig;
//!
//! let config = DecoderConfig::from_json(r#"{
//!     "vocab_size": 64, "max_len": 40, "input_size": 32, "hidden_size": 32,
//!     "sos_id": 1, "eos_id": 2,
//!     "attention": { "strategy": { "kind": "plain" } },
//!     "stack": { "kind": "grammar", "composition": "additive" }
//! }"#)?;
//! ```
//!
//! Optional sections fall back to their defaults: one GRU layer, no dropout,
//! no attention, no auxiliary stack, unconstrained decoding.

use serde::{Deserialize, Serialize};

use crate::error::{DecoderError, Result};

/// Recurrent cell family
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RnnKind {
    #[default]
    Gru,
    Lstm,
}

/// How attention weights over the encoder positions are restricted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttentionStrategyKind {
    /// Unconstrained weights over every source position
    #[default]
    Plain,
    /// Only positions within `radius` of the aligned input position
    Windowed { radius: usize },
    /// Global weights plus an explicit read of the aligned position
    BothSide,
}

/// How a query is scored against each encoder position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionScoring {
    /// `score = q · k`
    #[default]
    Dot,
    /// `score = v · tanh(W [q; k])`
    Additive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionConfig {
    #[serde(default)]
    pub strategy: AttentionStrategyKind,
    #[serde(default)]
    pub scoring: AttentionScoring,
}

impl AttentionConfig {
    /// Whether the strategy needs a per-example input pointer
    pub fn tracks_position(&self) -> bool {
        !matches!(self.strategy, AttentionStrategyKind::Plain)
    }
}

/// How a grammar stack combines a new symbol with its parent context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrammarComposition {
    /// `context = parent_context + embed(symbol)`
    #[default]
    Additive,
    /// `context = rnn(embed(symbol), hidden = parent_context)`
    Recurrent,
}

/// Which auxiliary stack is active during a decode call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StackConfig {
    #[default]
    None,
    Parent {
        /// Append the embedding of the current parent symbol to the features
        #[serde(default = "default_true")]
        parent_feature: bool,
        /// Attach a length tracker that counts consumed input words
        #[serde(default)]
        track_length: bool,
    },
    Grammar {
        #[serde(default)]
        composition: GrammarComposition,
        #[serde(default)]
        track_length: bool,
    },
}

fn default_true() -> bool {
    true
}

impl StackConfig {
    /// Number of hidden-width features the stack contributes per step
    pub fn feature_count(&self) -> usize {
        match self {
            StackConfig::None => 0,
            StackConfig::Parent { parent_feature, .. } => usize::from(*parent_feature),
            StackConfig::Grammar { .. } => 1,
        }
    }

    pub fn tracks_length(&self) -> bool {
        match self {
            StackConfig::None => false,
            StackConfig::Parent { track_length, .. } | StackConfig::Grammar { track_length, .. } => {
                *track_length
            }
        }
    }
}

/// Structural classes of a linearized-tree vocabulary
///
/// For a target like `(S (NP XX ) (VP XX ) )`, `(S`, `(NP` and `(VP` are open
/// symbols, `)` is a close symbol and `XX` is a shift symbol standing for one
/// input word. Symbols in none of the lists are unclassified.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolClasses {
    #[serde(default)]
    pub open: Vec<usize>,
    #[serde(default)]
    pub close: Vec<usize>,
    #[serde(default)]
    pub shift: Vec<usize>,
}

impl SymbolClasses {
    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.close.is_empty() && self.shift.is_empty()
    }
}

/// Decoder configuration
///
/// # Fields
///
/// - `vocab_size`: Number of output symbols
/// - `max_len`: Step limit for free-running decoding
/// - `input_size`: Width of the symbol embedding fed to the recurrent cell
/// - `hidden_size`: Width of the decoder hidden state (twice the encoder width
///   when the encoder is bidirectional)
/// - `sos_id` / `eos_id`: Start and end markers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub vocab_size: usize,
    pub max_len: usize,
    pub input_size: usize,
    pub hidden_size: usize,
    pub sos_id: usize,
    pub eos_id: usize,
    #[serde(default = "default_layers")]
    pub n_layers: usize,
    #[serde(default)]
    pub rnn_cell: RnnKind,
    #[serde(default)]
    pub bidirectional_encoder: bool,
    #[serde(default)]
    pub input_dropout: f32,
    #[serde(default)]
    pub dropout: f32,
    #[serde(default)]
    pub attention: Option<AttentionConfig>,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub constrained: bool,
    #[serde(default)]
    pub symbols: SymbolClasses,
}

fn default_layers() -> usize {
    1
}

impl DecoderConfig {
    /// Create a tiny config for tests and quick experiments
    ///
    /// Single GRU layer, 16-wide embeddings and hidden state, no attention and
    /// no auxiliary stack.
    pub fn tiny(vocab_size: usize, sos_id: usize, eos_id: usize) -> Self {
        Self {
            vocab_size,
            max_len: 20,
            input_size: 16,
            hidden_size: 16,
            sos_id,
            eos_id,
            n_layers: 1,
            rnn_cell: RnnKind::Gru,
            bidirectional_encoder: false,
            input_dropout: 0.0,
            dropout: 0.0,
            attention: None,
            stack: StackConfig::None,
            constrained: false,
            symbols: SymbolClasses::default(),
        }
    }

    /// Parse a JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DecoderError::config(format!("invalid decoder config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_attention(mut self, attention: AttentionConfig) -> Self {
        self.attention = Some(attention);
        self
    }

    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_constraints(mut self, symbols: SymbolClasses) -> Self {
        self.constrained = true;
        self.symbols = symbols;
        self
    }

    pub fn use_attention(&self) -> bool {
        self.attention.is_some()
    }

    /// Width of the hidden state of one encoder direction
    pub fn encoder_hidden_size(&self) -> usize {
        if self.bidirectional_encoder {
            self.hidden_size / 2
        } else {
            self.hidden_size
        }
    }

    /// Number of hidden-width slots in the composed feature vector
    ///
    /// One slot always holds the recurrent (or attention-augmented) output;
    /// the active stack may add one more.
    pub fn feature_slots(&self) -> usize {
        1 + self.stack.feature_count()
    }

    /// Check static consistency of the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("max_len", self.max_len),
            ("input_size", self.input_size),
            ("hidden_size", self.hidden_size),
            ("n_layers", self.n_layers),
        ] {
            if value == 0 {
                return Err(DecoderError::config(format!("{name} must be positive")));
            }
        }

        for (name, id) in [("sos_id", self.sos_id), ("eos_id", self.eos_id)] {
            if id >= self.vocab_size {
                return Err(DecoderError::config(format!(
                    "{name} {id} is outside the vocabulary (size {})",
                    self.vocab_size
                )));
            }
        }

        for (name, rate) in [("input_dropout", self.input_dropout), ("dropout", self.dropout)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(DecoderError::config(format!(
                    "{name} must be between 0.0 and 1.0, got {rate}"
                )));
            }
        }

        if self.bidirectional_encoder && self.hidden_size % 2 != 0 {
            return Err(DecoderError::config(
                "hidden_size must be even when the encoder is bidirectional",
            ));
        }

        if self.constrained && !matches!(self.stack, StackConfig::Parent { .. }) {
            return Err(DecoderError::config(
                "constrained decoding needs the parent stack to compute masks",
            ));
        }

        let symbols = &self.symbols;
        if let Some(&id) = symbols
            .open
            .iter()
            .chain(&symbols.close)
            .chain(&symbols.shift)
            .find(|&&id| id >= self.vocab_size)
        {
            return Err(DecoderError::config(format!(
                "symbol class id {id} is outside the vocabulary"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiny_is_valid() {
        assert!(DecoderConfig::tiny(10, 0, 1).validate().is_ok());
    }

    #[test]
    fn test_from_json_defaults() {
        let config = DecoderConfig::from_json(
            r#"{"vocab_size": 12, "max_len": 5, "input_size": 4, "hidden_size": 6,
                "sos_id": 0, "eos_id": 1,
                "attention": {"strategy": {"kind": "windowed", "radius": 2}},
                "stack": {"kind": "parent"}}"#,
        )
        .unwrap();

        assert_eq!(config.n_layers, 1);
        assert_eq!(config.rnn_cell, RnnKind::Gru);
        assert_eq!(
            config.attention,
            Some(AttentionConfig {
                strategy: AttentionStrategyKind::Windowed { radius: 2 },
                scoring: AttentionScoring::Dot,
            })
        );
        assert_eq!(
            config.stack,
            StackConfig::Parent {
                parent_feature: true,
                track_length: false
            }
        );
        assert_eq!(config.feature_slots(), 2);
    }

    #[test]
    fn test_constrained_requires_parent_stack() {
        let config = DecoderConfig::tiny(10, 0, 1)
            .with_stack(StackConfig::Grammar {
                composition: GrammarComposition::Additive,
                track_length: false,
            })
            .with_constraints(SymbolClasses::default());
        assert!(matches!(
            config.validate(),
            Err(DecoderError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_vocab_ids() {
        let mut config = DecoderConfig::tiny(10, 0, 1);
        config.eos_id = 10;
        assert!(config.validate().is_err());

        let config = DecoderConfig::tiny(10, 0, 1)
            .with_stack(StackConfig::Parent {
                parent_feature: false,
                track_length: false,
            })
            .with_constraints(SymbolClasses {
                open: vec![3],
                close: vec![42],
                shift: vec![],
            });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bidirectional_needs_even_hidden() {
        let mut config = DecoderConfig::tiny(10, 0, 1);
        config.bidirectional_encoder = true;
        config.hidden_size = 15;
        assert!(config.validate().is_err());
        config.hidden_size = 16;
        assert_eq!(config.encoder_hidden_size(), 8);
    }
}
