//! Inputs and outputs of a decode call.

use serde::Serialize;

use crate::composer::Normalizer;
use crate::layers::HiddenState;
use crate::tensor::Tensor;

/// Everything a single decode call consumes
///
/// # Fields
///
/// - `targets`: Target symbols `[batch][time]`, used for teacher forcing and
///   to infer the batch size
/// - `encoder_hidden`: Final encoder state `[layers × directions, batch, hidden]`
/// - `encoder_outputs`: `[batch, source_len, hidden]`, required with attention
/// - `input_lengths`: Source length of every example, for position tracking
/// - `normalizer`: Maps raw scores to the recorded step outputs
/// - `teacher_forcing_ratio`: Probability in `[0, 1]` that the whole call is
///   teacher forced
#[derive(Clone, Copy, Debug, Default)]
pub struct DecodeInputs<'a> {
    pub targets: Option<&'a [Vec<usize>]>,
    pub encoder_hidden: Option<&'a HiddenState>,
    pub encoder_outputs: Option<&'a Tensor>,
    pub input_lengths: Option<&'a [usize]>,
    pub normalizer: Normalizer,
    pub teacher_forcing_ratio: f32,
}

impl<'a> DecodeInputs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets(mut self, targets: &'a [Vec<usize>]) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn encoder_hidden(mut self, hidden: &'a HiddenState) -> Self {
        self.encoder_hidden = Some(hidden);
        self
    }

    pub fn encoder_outputs(mut self, outputs: &'a Tensor) -> Self {
        self.encoder_outputs = Some(outputs);
        self
    }

    pub fn input_lengths(mut self, lengths: &'a [usize]) -> Self {
        self.input_lengths = Some(lengths);
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn teacher_forcing(mut self, ratio: f32) -> Self {
        self.teacher_forcing_ratio = ratio;
        self
    }
}

/// Write-once per-example sequence lengths
///
/// Every example starts at the step budget. The first time an example
/// produces the end marker its length becomes the number of steps taken so
/// far; later end markers leave it alone.
#[derive(Clone, Debug)]
pub struct LengthTracker {
    lengths: Vec<usize>,
    finished: Vec<bool>,
    eos_id: usize,
}

impl LengthTracker {
    pub fn new(batch_size: usize, max_length: usize, eos_id: usize) -> Self {
        Self {
            lengths: vec![max_length; batch_size],
            finished: vec![false; batch_size],
            eos_id,
        }
    }

    /// Record the symbols chosen at `step` (0-based)
    pub fn record(&mut self, step: usize, symbols: &[usize]) {
        for (b, &symbol) in symbols.iter().enumerate() {
            if symbol == self.eos_id && !self.finished[b] {
                self.finished[b] = true;
                self.lengths[b] = step + 1;
            }
        }
    }

    pub fn into_lengths(self) -> Vec<usize> {
        self.lengths
    }
}

/// Result of a decode call
#[derive(Clone, Debug)]
pub struct DecodeOutput {
    /// Normalized output of every step, each [batch, vocab_size]
    pub outputs: Vec<Tensor>,
    /// Symbol chosen at every step, one per example
    pub symbols: Vec<Vec<usize>>,
    /// Per-example length: steps up to and including the first end marker
    pub lengths: Vec<usize>,
    /// Attention weights of every step, each [batch, source_len]
    pub attention: Option<Vec<Tensor>>,
    /// Decoder state after the last step
    pub hidden: HiddenState,
    /// Whether this call ran teacher forced
    pub teacher_forced: bool,
}

impl DecodeOutput {
    pub fn steps(&self) -> usize {
        self.outputs.len()
    }

    /// Predicted symbols of each example, cut at its recorded length
    pub fn sequences(&self) -> Vec<Vec<usize>> {
        self.lengths
            .iter()
            .enumerate()
            .map(|(b, &length)| {
                self.symbols
                    .iter()
                    .take(length)
                    .map(|step| step[b])
                    .collect()
            })
            .collect()
    }

    pub fn summary(&self) -> DecodeSummary {
        DecodeSummary {
            teacher_forced: self.teacher_forced,
            steps: self.steps(),
            lengths: self.lengths.clone(),
            sequences: self.sequences(),
        }
    }
}

/// Serializable digest of a [`DecodeOutput`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecodeSummary {
    pub teacher_forced: bool,
    pub steps: usize,
    pub lengths: Vec<usize>,
    pub sequences: Vec<Vec<usize>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_is_written_once() {
        let eos = 1;
        let mut tracker = LengthTracker::new(2, 8, eos);
        for (step, symbols) in [[4, 4], [4, 4], [eos, 4], [4, 4], [eos, 4]].iter().enumerate() {
            tracker.record(step, symbols);
        }
        assert_eq!(tracker.into_lengths(), vec![3, 8]);
    }

    #[test]
    fn test_sequences_cut_at_length() {
        let output = DecodeOutput {
            outputs: vec![Tensor::zeros(vec![2, 3]); 3],
            symbols: vec![vec![2, 2], vec![1, 2], vec![2, 2]],
            lengths: vec![2, 3],
            attention: None,
            hidden: HiddenState::new(Tensor::zeros(vec![1, 2, 1])),
            teacher_forced: false,
        };
        assert_eq!(output.sequences(), vec![vec![2, 1], vec![2, 2, 2]]);

        let json = serde_json::to_string(&output.summary()).unwrap();
        assert!(json.contains("\"lengths\":[2,3]"));
    }
}
