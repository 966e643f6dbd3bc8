//! Attention over Encoder Outputs
//!
//! At every decoding step the recurrent output acts as a query against the
//! encoder outputs:
//!
//! ```text
//! scores  = score(query, encoder_outputs[b, s])      for every source position s
//! weights = softmax(masked scores)                    [batch, source_len]
//! context = weights @ encoder_outputs                 [batch, hidden]
//! output  = tanh(W_out [context; query] + b_out)      [batch, hidden]
//! ```
//!
//! ## Strategies
//!
//! - **Plain**: weights over every source position.
//! - **Windowed**: only positions within `radius` of the example's aligned
//!   input position get weight; everything else is masked before the softmax.
//! - **BothSide**: global weights as in Plain, plus an explicit read of the
//!   encoder output at the aligned position, mixed in as a third input to the
//!   output layer: `tanh(W_out [context; anchor; query] + b_out)`.
//!
//! The aligned position comes from a [`crate::stack::LengthInfo`] that the
//! decoder advances once per step before attention runs.
//!
//! ## Scoring
//!
//! Dot scoring uses `q · k`. Additive scoring uses
//! `v · tanh(W_q q + W_k k)` with learned `W_q`, `W_k`, `v`.

use super::activation::tanh;
use super::linear::Linear;
use crate::config::{AttentionConfig, AttentionScoring, AttentionStrategyKind};
use crate::error::{DecoderError, Result};
use crate::tensor::Tensor;

/// Per-example aligned input position and input length
#[derive(Clone, Copy, Debug)]
pub struct Alignment<'a> {
    pub positions: &'a [usize],
    pub lengths: &'a [usize],
}

/// Score function between a query and the encoder outputs
#[derive(Clone, Debug)]
pub enum Scorer {
    Dot,
    Additive {
        w_query: Linear,
        w_key: Linear,
        v: Linear,
    },
}

impl Scorer {
    pub fn new(scoring: AttentionScoring, hidden_size: usize, seed: u64) -> Self {
        match scoring {
            AttentionScoring::Dot => Scorer::Dot,
            AttentionScoring::Additive => Scorer::Additive {
                w_query: Linear::new(hidden_size, hidden_size, seed),
                w_key: Linear::new(hidden_size, hidden_size, seed + 1),
                v: Linear::new(hidden_size, 1, seed + 2),
            },
        }
    }

    /// Scores of one query `[1, hidden]` against keys `[source_len, hidden]`
    fn score(&self, query: &Tensor, keys: &Tensor) -> Vec<f32> {
        match self {
            Scorer::Dot => keys.matmul(&query.transpose()).data,
            Scorer::Additive { w_query, w_key, v } => {
                let projected_query = w_query.forward(query);
                let projected_query = projected_query.reshape(&[projected_query.data.len()]);
                let energy = tanh(&w_key.forward(keys).add(&projected_query));
                v.forward(&energy).data
            }
        }
    }
}

/// Output of one attention call
#[derive(Clone, Debug)]
pub struct AttentionOutput {
    /// Attention-augmented decoder output [batch, hidden]
    pub output: Tensor,
    /// Distribution over source positions [batch, source_len]
    pub weights: Tensor,
}

/// Attention strategy, fixed at construction
#[derive(Clone, Debug)]
pub struct Attention {
    pub strategy: AttentionStrategyKind,
    pub scorer: Scorer,
    /// Mixing layer: [2 * hidden, hidden], or [3 * hidden, hidden] for BothSide
    pub linear_out: Linear,
    hidden_size: usize,
}

impl Attention {
    pub fn new(config: &AttentionConfig, hidden_size: usize, seed: u64) -> Self {
        let mix_inputs = match config.strategy {
            AttentionStrategyKind::BothSide => 3,
            _ => 2,
        };
        Self {
            strategy: config.strategy,
            scorer: Scorer::new(config.scoring, hidden_size, seed + 1),
            linear_out: Linear::new(mix_inputs * hidden_size, hidden_size, seed),
            hidden_size,
        }
    }

    /// Whether `forward` needs an [`Alignment`]
    pub fn needs_alignment(&self) -> bool {
        !matches!(self.strategy, AttentionStrategyKind::Plain)
    }

    /// Attend from the decoder output to the encoder outputs
    ///
    /// # Arguments
    ///
    /// * `output` - Decoder output for this step [batch, hidden]
    /// * `encoder_outputs` - [batch, source_len, hidden]
    /// * `alignment` - Required by Windowed and BothSide
    pub fn forward(
        &self,
        output: &Tensor,
        encoder_outputs: &Tensor,
        alignment: Option<Alignment<'_>>,
    ) -> Result<AttentionOutput> {
        let hidden = self.hidden_size;
        DecoderError::check_width("attention query", hidden, output.last_dim())?;
        if encoder_outputs.shape.len() != 3 {
            return Err(DecoderError::Capability(format!(
                "encoder outputs must be [batch, source_len, hidden], got {:?}",
                encoder_outputs.shape
            )));
        }
        let batch = output.rows();
        DecoderError::check_width("encoder output batch", batch, encoder_outputs.shape[0])?;
        DecoderError::check_width("encoder output width", hidden, encoder_outputs.shape[2])?;
        let source_len = encoder_outputs.shape[1];

        let alignment = match (self.needs_alignment(), alignment) {
            (true, None) => {
                return Err(DecoderError::Capability(format!(
                    "{:?} attention needs an input alignment",
                    self.strategy
                )))
            }
            (true, Some(a)) => {
                DecoderError::check_width("alignment batch", batch, a.positions.len())?;
                Some(a)
            }
            (false, _) => None,
        };

        let mut scores = Vec::with_capacity(batch * source_len);
        for b in 0..batch {
            let query = output.select(b).reshape(&[1, hidden]);
            scores.extend(self.scorer.score(&query, &encoder_outputs.select(b)));
        }
        let mut scores = Tensor::new(scores, vec![batch, source_len]);

        if let (AttentionStrategyKind::Windowed { radius }, Some(a)) = (self.strategy, alignment) {
            scores = scores.masked_fill(&window_mask(a, radius, batch, source_len), f32::NEG_INFINITY);
        }
        let weights = scores.softmax(-1);

        let mut context = Vec::with_capacity(batch * hidden);
        for b in 0..batch {
            let row = Tensor::new(weights.row(b).to_vec(), vec![1, source_len]);
            context.extend(row.matmul(&encoder_outputs.select(b)).data);
        }
        let context = Tensor::new(context, vec![batch, hidden]);

        let mixed = match (self.strategy, alignment) {
            (AttentionStrategyKind::BothSide, Some(a)) => {
                let anchors: Vec<Tensor> = (0..batch)
                    .map(|b| {
                        let site = a.positions[b].min(source_len.saturating_sub(1));
                        encoder_outputs.select(b).select(site)
                    })
                    .collect();
                let anchor = Tensor::stack(&anchors);
                Tensor::cat_last(&[&context, &anchor, output])
            }
            _ => Tensor::cat_last(&[&context, output]),
        };

        Ok(AttentionOutput {
            output: tanh(&self.linear_out.forward(&mixed)),
            weights,
        })
    }
}

/// Non-zero marks positions outside the window `[p - radius, p + radius]`
///
/// The window is clipped to the example's input length, and always keeps at
/// least the aligned position itself.
fn window_mask(alignment: Alignment<'_>, radius: usize, batch: usize, source_len: usize) -> Tensor {
    let mut mask = vec![1.0; batch * source_len];
    for b in 0..batch {
        let length = alignment
            .lengths
            .get(b)
            .copied()
            .unwrap_or(source_len)
            .clamp(1, source_len.max(1));
        let center = alignment.positions[b].min(length - 1);
        let lo = center.saturating_sub(radius);
        let hi = (center + radius).min(length - 1);
        for s in lo..=hi.min(source_len.saturating_sub(1)) {
            mask[b * source_len + s] = 0.0;
        }
    }
    Tensor::new(mask, vec![batch, source_len])
}
