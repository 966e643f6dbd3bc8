//! Feature Composer
//!
//! Assembles the per-step feature vector and projects it to vocabulary scores:
//!
//! ```text
//! features = [embedded ; stack feature? ; output]
//!             input      hidden            hidden
//! scores   = features @ W_out + b_out      [batch, vocab_size]
//! ```
//!
//! `output` is the attention-augmented output when attention is enabled and
//! the raw recurrent output otherwise. The stack feature is the grammar
//! context or the parent embedding, whichever stack is active.
//!
//! The width is fixed when the composer is built and must equal the input
//! width of the projection.

use crate::config::DecoderConfig;
use crate::error::{DecoderError, Result};
use crate::layers::Linear;
use crate::tensor::Tensor;

/// Turns raw vocabulary scores into the per-step output distribution
#[derive(Clone, Copy, Debug, Default)]
pub enum Normalizer {
    /// Log-probabilities over the vocabulary
    #[default]
    LogSoftmax,
    Softmax,
    /// Raw scores, for callers that normalize later themselves
    Identity,
    Custom(fn(&Tensor) -> Tensor),
}

impl Normalizer {
    pub fn apply(&self, scores: &Tensor) -> Tensor {
        match self {
            Normalizer::LogSoftmax => scores.log_softmax(-1),
            Normalizer::Softmax => scores.softmax(-1),
            Normalizer::Identity => scores.clone(),
            Normalizer::Custom(f) => f(scores),
        }
    }
}

/// Which slots the feature vector has
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureLayout {
    pub input_size: usize,
    pub hidden_size: usize,
    pub stack_feature: bool,
}

impl FeatureLayout {
    pub fn from_config(config: &DecoderConfig) -> Self {
        Self {
            input_size: config.input_size,
            hidden_size: config.hidden_size,
            stack_feature: config.stack.feature_count() > 0,
        }
    }

    /// `input_size + hidden_size × active slots`
    pub fn width(&self) -> usize {
        self.input_size + self.hidden_size * (1 + usize::from(self.stack_feature))
    }
}

#[derive(Clone, Debug)]
pub struct FeatureComposer {
    layout: FeatureLayout,
    pub projection: Linear,
}

impl FeatureComposer {
    /// # Errors
    ///
    /// `ShapeMismatch` when the projection does not take exactly
    /// `layout.width()` inputs
    pub fn new(layout: FeatureLayout, projection: Linear) -> Result<Self> {
        DecoderError::check_width("output projection input", layout.width(), projection.in_features())?;
        Ok(Self { layout, projection })
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    pub fn vocab_size(&self) -> usize {
        self.projection.out_features()
    }

    /// Concatenate the step features and project to raw scores
    pub fn compose(&self, embedded: &Tensor, stack_feature: Option<&Tensor>, output: &Tensor) -> Result<Tensor> {
        DecoderError::check_width("embedded input", self.layout.input_size, embedded.last_dim())?;
        DecoderError::check_width("decoder output", self.layout.hidden_size, output.last_dim())?;

        let features = match (self.layout.stack_feature, stack_feature) {
            (true, Some(feature)) => {
                DecoderError::check_width("stack feature", self.layout.hidden_size, feature.last_dim())?;
                Tensor::cat_last(&[embedded, feature, output])
            }
            (false, None) => Tensor::cat_last(&[embedded, output]),
            (expected, got) => {
                return Err(DecoderError::ShapeMismatch {
                    what: "stack feature count",
                    expected: usize::from(expected),
                    got: usize::from(got.is_some()),
                })
            }
        };

        Ok(self.projection.forward(&features))
    }
}
