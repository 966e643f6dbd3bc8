//! Constraint masks for structured decoding.
//!
//! During constrained free-running decoding the parent stack summarizes each
//! example's partial tree as a [`MaskState`], and a [`ConstraintMask`] turns
//! that into a row of multiplicative weights over the vocabulary. The decoder
//! multiplies the step's softmax by this row before taking the argmax.

use std::collections::HashSet;
use std::fmt;

use crate::config::SymbolClasses;

/// Symbolic state of one example, as seen by a mask policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskState {
    /// Number of open constituents
    pub depth: usize,
    /// Innermost open symbol, or the root symbol at depth 0
    pub top: usize,
    /// Last symbol pushed for this example
    pub previous: Option<usize>,
    /// The example already produced its end marker
    pub finished: bool,
    /// Input words still to be shifted, when lengths are tracked
    pub remaining: Option<usize>,
}

/// Policy mapping a [`MaskState`] to allowed next symbols
pub trait ConstraintMask: Send + Sync + fmt::Debug {
    /// Write the weight of every vocabulary entry into `row`
    ///
    /// `row` arrives zeroed; 1.0 allows a symbol, 0.0 forbids it.
    fn fill(&self, state: &MaskState, row: &mut [f32]);
}

/// Well-formedness mask for linearized bracket trees
///
/// - Before anything is emitted only an open symbol may start the tree.
/// - Inside the tree, open and shift symbols are allowed while input words
///   remain, and a close symbol is allowed unless it would close an empty
///   constituent.
/// - Once the tree is closed (depth back to 0) or the end marker was
///   produced, only the end marker is allowed.
///
/// If a state admits nothing else, the end marker is allowed.
#[derive(Clone, Debug)]
pub struct BracketConstraint {
    open: HashSet<usize>,
    close: HashSet<usize>,
    shift: HashSet<usize>,
    root: usize,
    eos: usize,
}

impl BracketConstraint {
    pub fn new(classes: &SymbolClasses, root: usize, eos: usize) -> Self {
        Self {
            open: classes.open.iter().copied().collect(),
            close: classes.close.iter().copied().collect(),
            shift: classes.shift.iter().copied().collect(),
            root,
            eos,
        }
    }

    fn allow(row: &mut [f32], ids: &HashSet<usize>) {
        for &id in ids {
            if let Some(slot) = row.get_mut(id) {
                *slot = 1.0;
            }
        }
    }
}

impl ConstraintMask for BracketConstraint {
    fn fill(&self, state: &MaskState, row: &mut [f32]) {
        let started = matches!(state.previous, Some(p) if p != self.root);
        let words_left = state.remaining != Some(0);

        if state.finished {
            // only the end marker below
        } else if state.depth == 0 {
            if !started {
                Self::allow(row, &self.open);
            }
        } else {
            if words_left {
                Self::allow(row, &self.open);
                Self::allow(row, &self.shift);
            }
            let after_open = matches!(state.previous, Some(p) if self.open.contains(&p));
            if !after_open {
                Self::allow(row, &self.close);
            }
        }

        let closed = state.finished || (state.depth == 0 && started);
        if closed || row.iter().all(|&w| w == 0.0) {
            if let Some(slot) = row.get_mut(self.eos) {
                *slot = 1.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0 = sos, 1 = eos, 2 = "(S", 3 = "(NP", 4 = ")", 5 = "XX", 6 = unclassified
    fn constraint() -> BracketConstraint {
        BracketConstraint::new(
            &SymbolClasses {
                open: vec![2, 3],
                close: vec![4],
                shift: vec![5],
            },
            0,
            1,
        )
    }

    fn allowed(state: MaskState) -> Vec<usize> {
        let mut row = vec![0.0; 7];
        constraint().fill(&state, &mut row);
        row.iter()
            .enumerate()
            .filter(|(_, &w)| w > 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    fn state(depth: usize, previous: Option<usize>) -> MaskState {
        MaskState {
            depth,
            top: 0,
            previous,
            finished: false,
            remaining: None,
        }
    }

    #[test]
    fn test_tree_must_start_with_open() {
        assert_eq!(allowed(state(0, Some(0))), vec![2, 3]);
    }

    #[test]
    fn test_no_empty_constituents() {
        assert_eq!(allowed(state(1, Some(3))), vec![2, 3, 5]);
        assert_eq!(allowed(state(1, Some(5))), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_closed_tree_only_ends() {
        assert_eq!(allowed(state(0, Some(4))), vec![1]);
        let mut done = state(2, Some(5));
        done.finished = true;
        assert_eq!(allowed(done), vec![1]);
    }

    #[test]
    fn test_finished_open_tree_only_ends() {
        // end marker already produced while constituents are still open
        let mut s = state(2, Some(5));
        s.finished = true;
        s.remaining = Some(0);
        let mut row = vec![0.0; 7];
        constraint().fill(&s, &mut row);
        assert_eq!(row, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_no_shift_after_input_consumed() {
        let mut s = state(2, Some(5));
        s.remaining = Some(0);
        assert_eq!(allowed(s), vec![4]);
    }
}
