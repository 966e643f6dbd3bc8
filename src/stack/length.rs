//! Input position tracking.
//!
//! A [`LengthInfo`] follows, per example, how many input words the decoded
//! prefix has consumed. Attention strategies read the current site to center
//! or anchor their weights; the bracket constraint reads the remaining count
//! to decide whether more words may still be shifted.

use std::collections::HashSet;

/// Per-example pointer into the encoder sequence
#[derive(Clone, Debug)]
pub struct LengthInfo {
    lengths: Vec<usize>,
    consumed: Vec<usize>,
    root: usize,
    /// Symbols that consume an input word; empty means every non-root symbol does
    shift: HashSet<usize>,
}

impl LengthInfo {
    /// # Arguments
    ///
    /// * `lengths` - Input length of every example
    /// * `root` - Start symbol, never advances the pointer
    /// * `shift` - Symbols that consume one input word
    pub fn new(lengths: Vec<usize>, root: usize, shift: &[usize]) -> Self {
        let consumed = vec![0; lengths.len()];
        Self {
            lengths,
            consumed,
            root,
            shift: shift.iter().copied().collect(),
        }
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    fn advances(&self, symbol: usize) -> bool {
        symbol != self.root && (self.shift.is_empty() || self.shift.contains(&symbol))
    }

    /// Record the symbols fed to the decoder at this step
    pub fn push(&mut self, symbols: &[usize]) {
        for (b, &symbol) in symbols.iter().enumerate().take(self.consumed.len()) {
            if self.advances(symbol) {
                self.consumed[b] += 1;
            }
        }
    }

    /// Current aligned position of every example, clipped to its input
    pub fn cur_site(&self) -> Vec<usize> {
        self.consumed
            .iter()
            .zip(&self.lengths)
            .map(|(&c, &len)| c.min(len.saturating_sub(1)))
            .collect()
    }

    /// Input words not yet consumed by example `b`
    pub fn remaining(&self, b: usize) -> usize {
        self.lengths[b].saturating_sub(self.consumed[b])
    }
}
