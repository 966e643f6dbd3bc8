//! Decoding loop.
//!
//! ```text
//! INIT ──draw < ratio──▶ TEACHER_FORCED_STEPPING ──▶ DONE
//!   └───otherwise─────▶ FREE_STEPPING ────────────▶ DONE
//! ```

use rand::{Rng, RngCore};
use tracing::{debug, trace};

use super::output::{DecodeInputs, DecodeOutput, LengthTracker};
use super::step::StepAux;
use super::Decoder;
use crate::composer::Normalizer;
use crate::config::StackConfig;
use crate::error::{DecoderError, Result};
use crate::layers::HiddenState;
use crate::stack::{AuxiliaryStack, GrammarStack, LengthInfo, ParentStack};
use crate::tensor::Tensor;

/// Outcome of argument validation
struct Plan {
    batch_size: usize,
    /// Step budget: `T - 1` when teacher forcing is possible, else `max_len`
    max_length: usize,
    /// Input lengths used by position tracking
    input_lengths: Vec<usize>,
}

/// Accumulators owned by the loop
struct Accumulator {
    outputs: Vec<Tensor>,
    symbols: Vec<Vec<usize>>,
    attention: Option<Vec<Tensor>>,
    lengths: LengthTracker,
}

impl Accumulator {
    fn record(&mut self, step: usize, output: Tensor, symbols: Vec<usize>, attention: Option<Tensor>) {
        if let (Some(all), Some(weights)) = (self.attention.as_mut(), attention) {
            all.push(weights);
        }
        self.lengths.record(step, &symbols);
        self.outputs.push(output);
        self.symbols.push(symbols);
    }
}

impl Decoder {
    /// Decode one batch
    ///
    /// # Arguments
    ///
    /// * `inputs` - Targets, encoder state and call options
    /// * `rng` - Decides teacher forcing (one draw per call) and drives dropout
    ///
    /// # Errors
    ///
    /// `Configuration` before any step runs when:
    /// - attention is enabled and `encoder_outputs` is missing or has no
    ///   source positions
    /// - neither `targets` nor `encoder_hidden` is given
    /// - `targets` is missing while `teacher_forcing_ratio > 0`
    ///
    /// Step failures (shape mismatches, stack underflow) abort the call.
    pub fn decode<R: Rng>(&self, inputs: &DecodeInputs<'_>, rng: &mut R) -> Result<DecodeOutput> {
        let plan = self.validate_args(inputs)?;
        let rng: &mut dyn RngCore = rng;

        let mut hidden = self.init_state(inputs.encoder_hidden, plan.batch_size);
        let mut aux = self.init_stack(plan.batch_size, &plan.input_lengths);

        let use_teacher_forcing = rng.random::<f32>() < inputs.teacher_forcing_ratio;
        debug!(
            batch_size = plan.batch_size,
            max_length = plan.max_length,
            teacher_forced = use_teacher_forcing,
            "decode start"
        );

        let mut acc = Accumulator {
            outputs: Vec::with_capacity(plan.max_length),
            symbols: Vec::with_capacity(plan.max_length),
            attention: self.attention.as_ref().map(|_| Vec::with_capacity(plan.max_length)),
            lengths: LengthTracker::new(plan.batch_size, plan.max_length, self.config.eos_id),
        };

        if use_teacher_forcing {
            // validate_args guarantees targets whenever the ratio is positive
            let targets = inputs
                .targets
                .ok_or_else(|| DecoderError::config("teacher forcing needs targets"))?;
            for di in 0..plan.max_length {
                let input: Vec<usize> = targets.iter().map(|row| row[di]).collect();
                let step = self.forward_step(
                    &input,
                    &hidden,
                    &mut aux,
                    inputs.encoder_outputs,
                    inputs.normalizer,
                    rng,
                )?;
                hidden = step.hidden;
                let symbols = step.distribution.argmax_last();
                trace!(step = di, ?symbols, "teacher forced step");
                acc.record(di, step.distribution, symbols, step.attention);
            }
        } else {
            let mut input: Vec<usize> = match inputs.targets {
                Some(targets) => targets.iter().map(|row| row[0]).collect(),
                None => vec![self.config.sos_id; plan.batch_size],
            };

            for di in 0..plan.max_length {
                let (output, symbols, attention) = match &self.constraint {
                    Some(policy) => {
                        let step = self.forward_step(
                            &input,
                            &hidden,
                            &mut aux,
                            inputs.encoder_outputs,
                            Normalizer::Identity,
                            rng,
                        )?;
                        hidden = step.hidden;
                        let stack = aux.stack.as_ref().ok_or_else(|| {
                            DecoderError::config("constrained decoding needs an auxiliary stack")
                        })?;
                        let mask = stack.mask(policy.as_ref(), self.config.vocab_size)?;
                        let symbols = step.distribution.softmax(-1).mul(&mask).argmax_last();
                        (inputs.normalizer.apply(&step.distribution), symbols, step.attention)
                    }
                    None => {
                        let step = self.forward_step(
                            &input,
                            &hidden,
                            &mut aux,
                            inputs.encoder_outputs,
                            inputs.normalizer,
                            rng,
                        )?;
                        hidden = step.hidden;
                        let symbols = step.distribution.argmax_last();
                        (step.distribution, symbols, step.attention)
                    }
                };

                trace!(step = di, ?symbols, "free step");
                input.clone_from(&symbols);
                acc.record(di, output, symbols, attention);
            }
        }

        let lengths = acc.lengths.into_lengths();
        debug!(?lengths, steps = acc.outputs.len(), "decode done");

        Ok(DecodeOutput {
            outputs: acc.outputs,
            symbols: acc.symbols,
            lengths,
            attention: acc.attention,
            hidden,
            teacher_forced: use_teacher_forcing,
        })
    }

    fn validate_args(&self, inputs: &DecodeInputs<'_>) -> Result<Plan> {
        let config = &self.config;
        let ratio = inputs.teacher_forcing_ratio;

        if self.attention.is_some() && inputs.encoder_outputs.is_none() {
            return Err(DecoderError::config(
                "encoder outputs cannot be absent when attention is used",
            ));
        }
        if !(0.0..=1.0).contains(&ratio) {
            return Err(DecoderError::config(format!(
                "teacher forcing ratio must be in [0, 1], got {ratio}"
            )));
        }

        let batch_size = match (inputs.targets, inputs.encoder_hidden) {
            (Some(targets), _) => targets.len(),
            (None, Some(hidden)) => hidden.batch_size().ok_or_else(|| {
                DecoderError::config("encoder hidden state must be [layers, batch, hidden]")
            })?,
            (None, None) => {
                return Err(DecoderError::config(
                    "either targets or an encoder hidden state is needed to infer the batch size",
                ))
            }
        };
        if batch_size == 0 {
            return Err(DecoderError::config("cannot decode an empty batch"));
        }

        let max_length = match inputs.targets {
            None if ratio > 0.0 => {
                return Err(DecoderError::config(
                    "teacher forcing has to be disabled (ratio 0) when no targets are provided",
                ))
            }
            None => config.max_len,
            Some(targets) => {
                let time = targets[0].len();
                if time == 0 || targets.iter().any(|row| row.len() != time) {
                    return Err(DecoderError::config(
                        "targets must be non-empty rows of equal length",
                    ));
                }
                if let Some(&id) = targets.iter().flatten().find(|&&id| id >= config.vocab_size) {
                    return Err(DecoderError::config(format!(
                        "target symbol {id} is outside the vocabulary"
                    )));
                }
                if ratio > 0.0 {
                    time - 1
                } else {
                    config.max_len
                }
            }
        };

        if let Some(hidden) = inputs.encoder_hidden {
            if hidden.batch_size() != Some(batch_size) {
                return Err(DecoderError::config(format!(
                    "encoder hidden state batch {:?} does not match batch size {batch_size}",
                    hidden.batch_size()
                )));
            }
            if config.bidirectional_encoder && hidden.h.shape[0] % 2 != 0 {
                return Err(DecoderError::config(
                    "bidirectional encoder state needs an even number of layer slices",
                ));
            }
        }

        let source_len = match inputs.encoder_outputs {
            Some(outputs) => {
                if outputs.shape.len() != 3 || outputs.shape[0] != batch_size {
                    return Err(DecoderError::config(format!(
                        "encoder outputs {:?} do not match batch size {batch_size}",
                        outputs.shape
                    )));
                }
                if self.attention.is_some() && outputs.shape[1] == 0 {
                    return Err(DecoderError::config(
                        "attention needs at least one encoder output position",
                    ));
                }
                Some(outputs.shape[1])
            }
            None => None,
        };

        let input_lengths = match inputs.input_lengths {
            Some(lengths) if lengths.len() != batch_size => {
                return Err(DecoderError::config(format!(
                    "{} input lengths given for a batch of {batch_size}",
                    lengths.len()
                )))
            }
            Some(lengths) => lengths.to_vec(),
            None => vec![source_len.unwrap_or(config.max_len); batch_size],
        };

        Ok(Plan {
            batch_size,
            max_length,
            input_lengths,
        })
    }

    /// Seed the decoder state from the encoder's final state
    ///
    /// Bidirectional encoder states are reshaped from
    /// `[2 × layers, batch, hidden]` to `[layers, batch, 2 × hidden]`.
    fn init_state(&self, encoder_hidden: Option<&HiddenState>, batch_size: usize) -> HiddenState {
        match encoder_hidden {
            None => self.rnn.zero_state(batch_size),
            Some(hidden) if self.config.bidirectional_encoder => hidden.cat_directions(),
            Some(hidden) => hidden.clone(),
        }
    }

    fn init_stack(&self, batch_size: usize, input_lengths: &[usize]) -> StepAux {
        let config = &self.config;
        let length_info = || LengthInfo::new(input_lengths.to_vec(), config.sos_id, &config.symbols.shift);

        let stack = match config.stack {
            StackConfig::None => None,
            StackConfig::Parent { track_length, .. } => {
                let stack = ParentStack::new(batch_size, config.sos_id, config.eos_id, &config.symbols);
                Some(AuxiliaryStack::Parent(if track_length {
                    stack.with_length_info(length_info())
                } else {
                    stack
                }))
            }
            StackConfig::Grammar { track_length, .. } => {
                let stack = GrammarStack::new();
                Some(AuxiliaryStack::Grammar(if track_length {
                    stack.with_length_info(length_info())
                } else {
                    stack
                }))
            }
        };

        let alignment = self
            .attention
            .as_ref()
            .filter(|attention| attention.needs_alignment())
            .map(|_| length_info());

        StepAux { stack, alignment }
    }
}
