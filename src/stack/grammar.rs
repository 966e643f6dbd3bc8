//! Grammar-context stack.
//!
//! The grammar stack carries a composed "derivation context" for the whole
//! batch. Every push combines the embedding of the new symbol with the context
//! popped from the top of the stack:
//!
//! ```text
//! additive:   context' = context + embed(symbol)
//! recurrent:  context' = GRU(embed(symbol), hidden = context)
//! ```
//!
//! The very first push has no parent and stores the embedding itself.

use super::length::LengthInfo;
use crate::config::GrammarComposition;
use crate::error::{DecoderError, Result};
use crate::layers::GruLayer;
use crate::tensor::Tensor;

/// One frame of the grammar stack
#[derive(Clone, Debug, PartialEq)]
pub struct GrammarFrame {
    /// Symbols pushed with this frame, one per example
    pub symbols: Vec<usize>,
    /// Composed context carried to the next push [batch, hidden]
    pub context: Tensor,
    /// Embedding of `symbols` [batch, hidden]
    pub current: Tensor,
}

#[derive(Clone, Debug, Default)]
pub struct GrammarStack {
    frames: Vec<GrammarFrame>,
    length_info: Option<LengthInfo>,
}

impl GrammarStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length_info(mut self, length_info: LengthInfo) -> Self {
        self.length_info = Some(length_info);
        self
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: GrammarFrame) {
        if let Some(length_info) = self.length_info.as_mut() {
            length_info.push(&frame.symbols);
        }
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<GrammarFrame> {
        self.frames
            .pop()
            .ok_or(DecoderError::Underflow { stack: "grammar" })
    }

    pub fn peek(&self) -> Option<&GrammarFrame> {
        self.frames.last()
    }

    pub fn top_symbols(&self) -> Option<&[usize]> {
        self.peek().map(|frame| frame.symbols.as_slice())
    }
}

/// Composition parameters shared by every decode call
#[derive(Clone, Debug)]
pub struct GrammarComposer {
    pub mode: GrammarComposition,
    /// Present in recurrent mode: [hidden] → [hidden] single GRU layer
    pub rnn: Option<GruLayer>,
}

impl GrammarComposer {
    pub fn new(mode: GrammarComposition, hidden_size: usize, seed: u64) -> Self {
        let rnn = match mode {
            GrammarComposition::Additive => None,
            GrammarComposition::Recurrent => Some(GruLayer::new(hidden_size, hidden_size, seed)),
        };
        Self { mode, rnn }
    }

    fn recur(&self, input: &Tensor, hidden: &Tensor) -> Result<Tensor> {
        let rnn = self
            .rnn
            .as_ref()
            .ok_or_else(|| DecoderError::Capability("recurrent grammar composition has no GRU".into()))?;
        DecoderError::check_width("grammar context", rnn.hidden_size(), hidden.last_dim())?;
        Ok(rnn.forward(input, hidden))
    }

    /// Push `symbols` onto `stack` and return this step's grammar context
    ///
    /// # Arguments
    ///
    /// * `stack` - Grammar stack of the current decode call
    /// * `symbols` - Decoder input symbols, one per example
    /// * `embedded` - Grammar embedding of `symbols` [batch, hidden]
    pub fn update(&self, stack: &mut GrammarStack, symbols: &[usize], embedded: Tensor) -> Result<Tensor> {
        if stack.peek().is_none() {
            let context = match self.mode {
                GrammarComposition::Additive => embedded.clone(),
                GrammarComposition::Recurrent => self.recur(&embedded, &embedded)?,
            };
            stack.push(GrammarFrame {
                symbols: symbols.to_vec(),
                context: embedded.clone(),
                current: embedded,
            });
            return Ok(context);
        }

        let top = stack.pop()?;
        let context = match self.mode {
            GrammarComposition::Additive => top.context.add(&embedded),
            GrammarComposition::Recurrent => self.recur(&embedded, &top.context)?,
        };
        stack.push(GrammarFrame {
            symbols: symbols.to_vec(),
            context: context.clone(),
            current: embedded,
        });
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embed(symbol: usize) -> Tensor {
        Tensor::new(vec![symbol as f32, 10.0 * symbol as f32], vec![1, 2])
    }

    #[test]
    fn test_additive_chain() {
        let composer = GrammarComposer::new(GrammarComposition::Additive, 2, 0);
        let mut stack = GrammarStack::new();
        let mut context = Tensor::zeros(vec![1, 2]);
        for symbol in [1, 2, 3] {
            context = composer.update(&mut stack, &[symbol], embed(symbol)).unwrap();
        }
        assert_eq!(context.data, vec![6.0, 60.0]);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.peek().unwrap().context, context);
        assert_eq!(stack.peek().unwrap().current, embed(3));
        assert_eq!(stack.top_symbols(), Some(&[3][..]));
    }

    #[test]
    fn test_recurrent_first_push_keeps_embedding() {
        let composer = GrammarComposer::new(GrammarComposition::Recurrent, 2, 4);
        let mut stack = GrammarStack::new();
        let context = composer.update(&mut stack, &[1], embed(1)).unwrap();
        assert_eq!(context.shape, vec![1, 2]);
        assert_eq!(stack.peek().unwrap().context, embed(1));

        let second = composer.update(&mut stack, &[2], embed(2)).unwrap();
        assert_eq!(stack.peek().unwrap().context, second);
    }

    #[test]
    fn test_recurrent_composition_feeds_parent_context_as_hidden() {
        use crate::layers::Linear;

        let weights = |n: usize, f: fn(usize) -> f32| Tensor::new((0..n).map(f).collect(), vec![2, 6]);
        let layer = GruLayer {
            w_ih: Linear::from_parts(
                weights(12, |i| ((i * 7) % 5) as f32 * 0.1 - 0.2),
                Tensor::new(vec![0.05, -0.1, 0.0, 0.1, -0.05, 0.2], vec![6]),
            )
            .unwrap(),
            w_hh: Linear::from_parts(
                weights(12, |i| ((i * 3) % 7) as f32 * 0.1 - 0.3),
                Tensor::zeros(vec![6]),
            )
            .unwrap(),
        };
        let composer = GrammarComposer {
            mode: GrammarComposition::Recurrent,
            rnn: Some(layer.clone()),
        };
        let symbol = |s: usize| Tensor::new(vec![0.3 * s as f32, 0.2 - 0.25 * s as f32], vec![1, 2]);

        let mut stack = GrammarStack::new();
        let first = composer.update(&mut stack, &[1], symbol(1)).unwrap();
        assert_eq!(first, layer.forward(&symbol(1), &symbol(1)));
        assert_eq!(stack.peek().unwrap().context, symbol(1));

        let second = composer.update(&mut stack, &[2], symbol(2)).unwrap();
        assert_eq!(second, layer.forward(&symbol(2), &symbol(1)));
        assert_ne!(second, layer.forward(&symbol(1), &symbol(2)));
        assert_eq!(stack.peek().unwrap().context, second);

        let third = composer.update(&mut stack, &[3], symbol(3)).unwrap();
        assert_eq!(third, layer.forward(&symbol(3), &second));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_pop_empty_underflows() {
        let mut stack = GrammarStack::new();
        assert_eq!(stack.pop(), Err(DecoderError::Underflow { stack: "grammar" }));
    }
}
