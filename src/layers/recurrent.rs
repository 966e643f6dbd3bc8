//! Recurrent Cells
//!
//! The decoder advances its hidden state one symbol at a time through a
//! [`RecurrentCell`]. Two stacked implementations are provided:
//!
//! ## GRU
//!
//! ```text
//! r  = σ(x W_ir + b_ir + h W_hr + b_hr)
//! z  = σ(x W_iz + b_iz + h W_hz + b_hz)
//! n  = tanh(x W_in + b_in + r ⊙ (h W_hn + b_hn))
//! h' = (1 - z) ⊙ n + z ⊙ h
//! ```
//!
//! ## LSTM
//!
//! ```text
//! i, f, g, o = σ, σ, tanh, σ  of  (x W_i + h W_h + b)
//! c' = f ⊙ c + i ⊙ g
//! h' = o ⊙ tanh(c')
//! ```
//!
//! Multi-layer stacks feed each layer's new hidden state to the next layer,
//! with dropout between layers in training mode. Hidden states are shaped
//! `[n_layers, batch, hidden]`; the step output is the top layer's new state.

use rand::RngCore;

use super::activation::{sigmoid, tanh};
use super::dropout::Dropout;
use super::linear::Linear;
use crate::error::{DecoderError, Result};
use crate::tensor::Tensor;

/// Hidden state threaded through a decode call
///
/// `c` holds the LSTM cell state and is `None` for GRU stacks.
#[derive(Clone, Debug, PartialEq)]
pub struct HiddenState {
    pub h: Tensor,
    pub c: Option<Tensor>,
}

impl HiddenState {
    pub fn new(h: Tensor) -> Self {
        Self { h, c: None }
    }

    pub fn with_cell(h: Tensor, c: Tensor) -> Self {
        Self { h, c: Some(c) }
    }

    /// Batch dimension of `h`
    pub fn batch_size(&self) -> Option<usize> {
        (self.h.shape.len() == 3).then(|| self.h.shape[1])
    }

    /// Merge the two directions of a bidirectional encoder state
    ///
    /// Applied to both members of an LSTM pair.
    pub fn cat_directions(&self) -> Self {
        Self {
            h: self.h.cat_directions(),
            c: self.c.as_ref().map(Tensor::cat_directions),
        }
    }
}

/// One step of a (possibly stacked) recurrent network
pub trait RecurrentCell: Send + Sync {
    fn input_size(&self) -> usize;
    fn hidden_size(&self) -> usize;
    fn n_layers(&self) -> usize;

    /// All-zero state for a batch
    fn zero_state(&self, batch_size: usize) -> HiddenState;

    fn set_training(&mut self, training: bool);

    /// Advance the state by one input
    ///
    /// # Arguments
    ///
    /// * `input` - `[batch, input_size]`
    /// * `state` - `[n_layers, batch, hidden_size]`
    /// * `rng` - Randomness for inter-layer dropout
    ///
    /// # Returns
    ///
    /// `(output [batch, hidden_size], new state)`
    fn step(
        &self,
        input: &Tensor,
        state: &HiddenState,
        rng: &mut dyn RngCore,
    ) -> Result<(Tensor, HiddenState)>;
}

fn check_step_shapes(cell: &dyn RecurrentCell, input: &Tensor, state: &HiddenState) -> Result<usize> {
    DecoderError::check_width("recurrent input", cell.input_size(), input.last_dim())?;
    let batch = input.rows();
    let expected = [cell.n_layers(), batch, cell.hidden_size()];
    for (what, tensor) in [("recurrent hidden state", Some(&state.h)), ("recurrent cell state", state.c.as_ref())] {
        let Some(tensor) = tensor else { continue };
        if tensor.shape != expected {
            let got = tensor.shape.iter().product();
            return Err(DecoderError::ShapeMismatch {
                what,
                expected: expected.iter().product(),
                got,
            });
        }
    }
    Ok(batch)
}

/// A single GRU layer
#[derive(Clone, Debug)]
pub struct GruLayer {
    /// Input projection for the r, z, n gates: [input, 3 * hidden]
    pub w_ih: Linear,
    /// Hidden projection for the r, z, n gates: [hidden, 3 * hidden]
    pub w_hh: Linear,
}

impl GruLayer {
    pub fn new(input_size: usize, hidden_size: usize, seed: u64) -> Self {
        Self {
            w_ih: Linear::new(input_size, 3 * hidden_size, seed),
            w_hh: Linear::new(hidden_size, 3 * hidden_size, seed + 1),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.w_hh.in_features()
    }

    /// `x [batch, input]`, `h [batch, hidden]` → `h' [batch, hidden]`
    pub fn forward(&self, x: &Tensor, h: &Tensor) -> Tensor {
        let hs = self.hidden_size();
        let gi = self.w_ih.forward(x);
        let gh = self.w_hh.forward(h);

        let r = sigmoid(&gi.narrow_last(0, hs).add(&gh.narrow_last(0, hs)));
        let z = sigmoid(&gi.narrow_last(hs, hs).add(&gh.narrow_last(hs, hs)));
        let n = tanh(&gi.narrow_last(2 * hs, hs).add(&r.mul(&gh.narrow_last(2 * hs, hs))));

        // h' = n + z * (h - n)
        n.add(&z.mul(&h.sub(&n)))
    }
}

/// Stacked GRU
#[derive(Clone, Debug)]
pub struct Gru {
    pub layers: Vec<GruLayer>,
    pub dropout: Dropout,
    input_size: usize,
}

impl Gru {
    pub fn new(input_size: usize, hidden_size: usize, n_layers: usize, dropout: f32, seed: u64) -> Self {
        let layers = (0..n_layers)
            .map(|i| {
                let layer_input = if i == 0 { input_size } else { hidden_size };
                GruLayer::new(layer_input, hidden_size, seed + 2 * i as u64)
            })
            .collect();
        Self {
            layers,
            dropout: Dropout::new(dropout),
            input_size,
        }
    }

    /// Build from explicit layers
    pub fn from_layers(layers: Vec<GruLayer>, dropout: f32) -> Result<Self> {
        let first = layers
            .first()
            .ok_or_else(|| DecoderError::config("a GRU needs at least one layer"))?;
        let input_size = first.w_ih.in_features();
        let hidden = first.hidden_size();
        for layer in &layers[1..] {
            DecoderError::check_width("stacked GRU layer input", hidden, layer.w_ih.in_features())?;
        }
        Ok(Self {
            layers,
            dropout: Dropout::new(dropout),
            input_size,
        })
    }
}

impl RecurrentCell for Gru {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn hidden_size(&self) -> usize {
        self.layers[0].hidden_size()
    }

    fn n_layers(&self) -> usize {
        self.layers.len()
    }

    fn zero_state(&self, batch_size: usize) -> HiddenState {
        HiddenState::new(Tensor::zeros(vec![self.n_layers(), batch_size, self.hidden_size()]))
    }

    fn set_training(&mut self, training: bool) {
        self.dropout.training = training;
    }

    fn step(
        &self,
        input: &Tensor,
        state: &HiddenState,
        rng: &mut dyn RngCore,
    ) -> Result<(Tensor, HiddenState)> {
        check_step_shapes(self, input, state)?;

        let mut x = input.clone();
        let mut new_h = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            let h = layer.forward(&x, &state.h.select(i));
            x = if i + 1 < self.layers.len() {
                self.dropout.forward(&h, rng)
            } else {
                h.clone()
            };
            new_h.push(h);
        }

        Ok((x, HiddenState::new(Tensor::stack(&new_h))))
    }
}

/// A single LSTM layer
#[derive(Clone, Debug)]
pub struct LstmLayer {
    /// Input projection for the i, f, g, o gates: [input, 4 * hidden]
    pub w_ih: Linear,
    /// Hidden projection for the i, f, g, o gates: [hidden, 4 * hidden]
    pub w_hh: Linear,
}

impl LstmLayer {
    pub fn new(input_size: usize, hidden_size: usize, seed: u64) -> Self {
        Self {
            w_ih: Linear::new(input_size, 4 * hidden_size, seed),
            w_hh: Linear::new(hidden_size, 4 * hidden_size, seed + 1),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.w_hh.in_features()
    }

    /// Returns `(h', c')`
    pub fn forward(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> (Tensor, Tensor) {
        let hs = self.hidden_size();
        let gates = self.w_ih.forward(x).add(&self.w_hh.forward(h));

        let i = sigmoid(&gates.narrow_last(0, hs));
        let f = sigmoid(&gates.narrow_last(hs, hs));
        let g = tanh(&gates.narrow_last(2 * hs, hs));
        let o = sigmoid(&gates.narrow_last(3 * hs, hs));

        let c_new = f.mul(c).add(&i.mul(&g));
        let h_new = o.mul(&tanh(&c_new));
        (h_new, c_new)
    }
}

/// Stacked LSTM
#[derive(Clone, Debug)]
pub struct Lstm {
    pub layers: Vec<LstmLayer>,
    pub dropout: Dropout,
    input_size: usize,
}

impl Lstm {
    pub fn new(input_size: usize, hidden_size: usize, n_layers: usize, dropout: f32, seed: u64) -> Self {
        let layers = (0..n_layers)
            .map(|i| {
                let layer_input = if i == 0 { input_size } else { hidden_size };
                LstmLayer::new(layer_input, hidden_size, seed + 2 * i as u64)
            })
            .collect();
        Self {
            layers,
            dropout: Dropout::new(dropout),
            input_size,
        }
    }
}

impl RecurrentCell for Lstm {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn hidden_size(&self) -> usize {
        self.layers[0].hidden_size()
    }

    fn n_layers(&self) -> usize {
        self.layers.len()
    }

    fn zero_state(&self, batch_size: usize) -> HiddenState {
        let shape = vec![self.n_layers(), batch_size, self.hidden_size()];
        HiddenState::with_cell(Tensor::zeros(shape.clone()), Tensor::zeros(shape))
    }

    fn set_training(&mut self, training: bool) {
        self.dropout.training = training;
    }

    fn step(
        &self,
        input: &Tensor,
        state: &HiddenState,
        rng: &mut dyn RngCore,
    ) -> Result<(Tensor, HiddenState)> {
        check_step_shapes(self, input, state)?;
        let cell = state
            .c
            .as_ref()
            .ok_or_else(|| DecoderError::Capability("LSTM state is missing its cell tensor".into()))?;

        let mut x = input.clone();
        let mut new_h = Vec::with_capacity(self.layers.len());
        let mut new_c = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            let (h, c) = layer.forward(&x, &state.h.select(i), &cell.select(i));
            x = if i + 1 < self.layers.len() {
                self.dropout.forward(&h, rng)
            } else {
                h.clone()
            };
            new_h.push(h);
            new_c.push(c);
        }

        Ok((
            x,
            HiddenState::with_cell(Tensor::stack(&new_h), Tensor::stack(&new_c)),
        ))
    }
}
