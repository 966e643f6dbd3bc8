//! Parent-tracking stack.
//!
//! Each example keeps its own stack of open constituents. The innermost open
//! symbol is the "parent" of whatever the decoder produces next; its embedding
//! can be appended to the step features, and its state drives the constraint
//! mask.
//!
//! With no symbol classes configured every pushed symbol opens a frame, so the
//! parent is simply the most recently pushed symbol.

use std::collections::HashSet;

use tracing::warn;

use super::constraint::{ConstraintMask, MaskState};
use super::length::LengthInfo;
use crate::config::SymbolClasses;
use crate::error::{DecoderError, Result};
use crate::tensor::Tensor;

#[derive(Clone, Debug)]
pub struct ParentStack {
    frames: Vec<Vec<usize>>,
    previous: Vec<Option<usize>>,
    finished: Vec<bool>,
    root: usize,
    eos: usize,
    open: HashSet<usize>,
    close: HashSet<usize>,
    classified: bool,
    length_info: Option<LengthInfo>,
}

impl ParentStack {
    pub fn new(batch_size: usize, root: usize, eos: usize, classes: &SymbolClasses) -> Self {
        Self {
            frames: vec![Vec::new(); batch_size],
            previous: vec![None; batch_size],
            finished: vec![false; batch_size],
            root,
            eos,
            open: classes.open.iter().copied().collect(),
            close: classes.close.iter().copied().collect(),
            classified: !classes.is_empty(),
            length_info: None,
        }
    }

    pub fn with_length_info(mut self, length_info: LengthInfo) -> Self {
        self.length_info = Some(length_info);
        self
    }

    /// Number of open frames for example `b`
    pub fn depth(&self, b: usize) -> usize {
        self.frames[b].len()
    }

    /// Push the symbols fed to the decoder at this step, one per example
    ///
    /// Open symbols push a frame, close symbols pop one. A close symbol on an
    /// empty stack is ignored. Nothing changes for an example after its end
    /// marker.
    pub fn push(&mut self, symbols: &[usize]) {
        for (b, &symbol) in symbols.iter().enumerate().take(self.frames.len()) {
            if self.finished[b] {
                continue;
            }
            if symbol == self.eos {
                self.finished[b] = true;
            } else if !self.classified || self.open.contains(&symbol) {
                self.frames[b].push(symbol);
            } else if self.close.contains(&symbol) && self.pop(b).is_err() {
                warn!(example = b, symbol, "close symbol with no open constituent");
            }
            self.previous[b] = Some(symbol);
        }

        if let Some(length_info) = self.length_info.as_mut() {
            length_info.push(symbols);
        }
    }

    /// Remove and return the innermost open symbol of example `b`
    pub fn pop(&mut self, b: usize) -> Result<usize> {
        self.frames[b]
            .pop()
            .ok_or(DecoderError::Underflow { stack: "parent" })
    }

    /// Innermost open symbol of example `b`, without removing it
    pub fn peek(&self, b: usize) -> Option<usize> {
        self.frames[b].last().copied()
    }

    /// Current parent of every example; the root symbol at depth 0
    pub fn top_symbols(&self) -> Vec<usize> {
        (0..self.frames.len())
            .map(|b| self.peek(b).unwrap_or(self.root))
            .collect()
    }

    pub fn mask_state(&self, b: usize) -> MaskState {
        MaskState {
            depth: self.depth(b),
            top: self.peek(b).unwrap_or(self.root),
            previous: self.previous[b],
            finished: self.finished[b],
            remaining: self.length_info.as_ref().map(|info| info.remaining(b)),
        }
    }

    /// Allowed-symbol weights for every example: [batch, vocab_size]
    pub fn mask(&self, policy: &dyn ConstraintMask, vocab_size: usize) -> Tensor {
        let mut mask = Tensor::zeros(vec![self.frames.len(), vocab_size]);
        for (b, row) in mask.data.chunks_mut(vocab_size).enumerate() {
            policy.fill(&self.mask_state(b), row);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> SymbolClasses {
        SymbolClasses {
            open: vec![2, 3],
            close: vec![4],
            shift: vec![5],
        }
    }

    #[test]
    fn test_unclassified_tracks_latest_symbol() {
        let mut stack = ParentStack::new(2, 0, 1, &SymbolClasses::default());
        assert_eq!(stack.top_symbols(), vec![0, 0]);
        stack.push(&[7, 8]);
        stack.push(&[9, 8]);
        assert_eq!(stack.top_symbols(), vec![9, 8]);
        assert_eq!(stack.depth(0), 2);
    }

    #[test]
    fn test_brackets_open_and_close() {
        let mut stack = ParentStack::new(1, 0, 1, &classes());
        for symbol in [0, 2, 3, 5] {
            stack.push(&[symbol]);
        }
        assert_eq!(stack.top_symbols(), vec![3]);
        stack.push(&[4]);
        assert_eq!(stack.top_symbols(), vec![2]);
        stack.push(&[4]);
        assert_eq!(stack.top_symbols(), vec![0]);
        // stray close is ignored
        stack.push(&[4]);
        assert_eq!(stack.depth(0), 0);
    }

    #[test]
    fn test_peek_keeps_pop_removes() {
        let mut stack = ParentStack::new(1, 0, 1, &classes());
        stack.push(&[2]);
        assert_eq!(stack.peek(0), Some(2));
        assert_eq!(stack.peek(0), Some(2));
        assert_eq!(stack.pop(0), Ok(2));
        assert_eq!(stack.pop(0), Err(DecoderError::Underflow { stack: "parent" }));
    }

    #[test]
    fn test_frozen_after_end_marker() {
        let mut stack = ParentStack::new(1, 0, 1, &classes());
        stack.push(&[2]);
        stack.push(&[1]);
        stack.push(&[3]);
        assert_eq!(stack.depth(0), 1);
        assert!(stack.mask_state(0).finished);
    }

    #[test]
    fn test_length_info_is_advanced() {
        let info = LengthInfo::new(vec![2], 0, &[5]);
        let mut stack = ParentStack::new(1, 0, 1, &classes()).with_length_info(info);
        for symbol in [0, 2, 5] {
            stack.push(&[symbol]);
        }
        assert_eq!(stack.mask_state(0).remaining, Some(1));
    }
}
