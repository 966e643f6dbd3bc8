//! One decoding step.

use rand::RngCore;

use super::Decoder;
use crate::composer::Normalizer;
use crate::error::{DecoderError, Result};
use crate::layers::{Alignment, HiddenState};
use crate::stack::{AuxiliaryStack, LengthInfo, StackParams};
use crate::tensor::Tensor;

/// Per-call symbolic state a step mutates
#[derive(Clone, Debug, Default)]
pub struct StepAux {
    /// Active auxiliary stack, if any
    pub stack: Option<AuxiliaryStack>,
    /// Input pointer for windowed / both-side attention
    pub alignment: Option<LengthInfo>,
}

/// What one step produces
#[derive(Clone, Debug)]
pub struct StepOutput {
    /// Normalized scores [batch, vocab_size]
    pub distribution: Tensor,
    pub hidden: HiddenState,
    /// Attention weights [batch, source_len] when attention is enabled
    pub attention: Option<Tensor>,
}

impl Decoder {
    /// Run one decoding step
    ///
    /// # Arguments
    ///
    /// * `symbols` - Input symbol of every example
    /// * `hidden` - Recurrent state before this step
    /// * `aux` - Stack and alignment state, updated in place
    /// * `encoder_outputs` - Required when attention is enabled
    /// * `normalizer` - Applied to the projected scores
    /// * `rng` - Randomness for dropout
    pub fn forward_step(
        &self,
        symbols: &[usize],
        hidden: &HiddenState,
        aux: &mut StepAux,
        encoder_outputs: Option<&Tensor>,
        normalizer: Normalizer,
        rng: &mut dyn RngCore,
    ) -> Result<StepOutput> {
        // === 1. Embed the input symbols ===
        let embedded = self.embedding.forward(symbols);
        let embedded = self.input_dropout.forward(&embedded, rng);

        // === 2. Advance the recurrent state ===
        let (mut output, hidden) = self.rnn.step(&embedded, hidden, rng)?;

        // === 3. Auxiliary stack ===
        let stack_feature = match (aux.stack.as_mut(), self.stack_embedding.as_ref()) {
            (Some(stack), Some(embedding)) => stack.update(
                symbols,
                StackParams {
                    embedding,
                    composer: self.grammar.as_ref(),
                    parent_feature: self.config.stack.feature_count() > 0,
                },
            )?,
            _ => None,
        };

        // === 4. Attention ===
        let mut weights = None;
        if let Some(attention) = &self.attention {
            let encoder_outputs = encoder_outputs.ok_or_else(|| {
                DecoderError::config("encoder outputs are required when attention is used")
            })?;

            let sites;
            let alignment = match aux.alignment.as_mut() {
                Some(info) if attention.needs_alignment() => {
                    info.push(symbols);
                    sites = info.cur_site();
                    Some(Alignment {
                        positions: &sites,
                        lengths: info.lengths(),
                    })
                }
                _ => None,
            };

            let attended = attention.forward(&output, encoder_outputs, alignment)?;
            output = attended.output;
            weights = Some(attended.weights);
        }

        // === 5. Compose and normalize ===
        let scores = self.composer.compose(&embedded, stack_feature.as_ref(), &output)?;

        Ok(StepOutput {
            distribution: normalizer.apply(&scores),
            hidden,
            attention: weights,
        })
    }
}
