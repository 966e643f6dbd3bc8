//! Auxiliary symbolic state.
//!
//! At most one auxiliary stack is active during a decode call, chosen by
//! [`crate::config::StackConfig`]:
//!
//! - [`ParentStack`]: per-example stack of open constituents; contributes the
//!   embedding of the current parent symbol and computes constraint masks.
//! - [`GrammarStack`]: batch-wide composed grammar context; contributes that
//!   context as a feature.
//!
//! Both are created fresh at the start of a decode call and updated once per
//! step with the symbols fed to the decoder.

pub mod constraint;
pub mod grammar;
pub mod length;
pub mod parent;

pub use constraint::{BracketConstraint, ConstraintMask, MaskState};
pub use grammar::{GrammarComposer, GrammarFrame, GrammarStack};
pub use length::LengthInfo;
pub use parent::ParentStack;

use crate::error::{DecoderError, Result};
use crate::layers::Embedding;
use crate::tensor::Tensor;

/// Model parameters a stack update needs
#[derive(Clone, Copy, Debug)]
pub struct StackParams<'a> {
    /// Embedding of stack symbols into the hidden width
    pub embedding: &'a Embedding,
    /// Present when the grammar stack is active
    pub composer: Option<&'a GrammarComposer>,
    /// Whether the parent stack contributes a feature
    pub parent_feature: bool,
}

#[derive(Clone, Debug)]
pub enum AuxiliaryStack {
    Parent(ParentStack),
    Grammar(GrammarStack),
}

impl AuxiliaryStack {
    /// Push this step's input symbols and return the contributed feature
    ///
    /// Grammar stacks always contribute their context. Parent stacks
    /// contribute the parent embedding only when configured to.
    pub fn update(&mut self, symbols: &[usize], params: StackParams<'_>) -> Result<Option<Tensor>> {
        match self {
            AuxiliaryStack::Grammar(stack) => {
                let composer = params
                    .composer
                    .ok_or_else(|| DecoderError::config("grammar stack without a composer"))?;
                let embedded = params.embedding.forward(symbols);
                composer.update(stack, symbols, embedded).map(Some)
            }
            AuxiliaryStack::Parent(stack) => {
                stack.push(symbols);
                Ok(params
                    .parent_feature
                    .then(|| params.embedding.forward(&stack.top_symbols())))
            }
        }
    }

    /// Current top symbol of every example, if any frame exists
    pub fn top_symbols(&self) -> Option<Vec<usize>> {
        match self {
            AuxiliaryStack::Parent(stack) => Some(stack.top_symbols()),
            AuxiliaryStack::Grammar(stack) => stack.top_symbols().map(<[usize]>::to_vec),
        }
    }

    /// Constraint mask [batch, vocab_size]; only parent stacks provide one
    pub fn mask(&self, policy: &dyn ConstraintMask, vocab_size: usize) -> Result<Tensor> {
        match self {
            AuxiliaryStack::Parent(stack) => Ok(stack.mask(policy, vocab_size)),
            AuxiliaryStack::Grammar(_) => Err(DecoderError::config(
                "constraint masks are only available from the parent stack",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrammarComposition, SymbolClasses};

    fn embedding() -> Embedding {
        Embedding::from_weight(Tensor::new(
            (0..8).map(|i| i as f32).collect(),
            vec![4, 2],
        ))
        .unwrap()
    }

    #[test]
    fn test_parent_feature_is_parent_embedding() {
        let table = embedding();
        let params = StackParams {
            embedding: &table,
            composer: None,
            parent_feature: true,
        };
        let mut stack = AuxiliaryStack::Parent(ParentStack::new(1, 0, 1, &SymbolClasses::default()));
        let feature = stack.update(&[3], params).unwrap().unwrap();
        assert_eq!(feature.data, vec![6.0, 7.0]);
        assert_eq!(stack.top_symbols(), Some(vec![3]));
    }

    #[test]
    fn test_parent_without_feature_contributes_nothing() {
        let table = embedding();
        let params = StackParams {
            embedding: &table,
            composer: None,
            parent_feature: false,
        };
        let mut stack = AuxiliaryStack::Parent(ParentStack::new(1, 0, 1, &SymbolClasses::default()));
        assert!(stack.update(&[2], params).unwrap().is_none());
    }

    #[test]
    fn test_grammar_stack_has_no_mask() {
        let table = embedding();
        let composer = GrammarComposer::new(GrammarComposition::Additive, 2, 0);
        let params = StackParams {
            embedding: &table,
            composer: Some(&composer),
            parent_feature: false,
        };
        let mut stack = AuxiliaryStack::Grammar(GrammarStack::new());
        assert_eq!(stack.top_symbols(), None);
        stack.update(&[1], params).unwrap();
        assert_eq!(stack.top_symbols(), Some(vec![1]));

        let policy = BracketConstraint::new(&SymbolClasses::default(), 0, 1);
        assert!(stack.mask(&policy, 4).is_err());
    }
}
