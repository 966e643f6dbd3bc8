//! Tensor Operations for Step-wise Decoding
//!
//! This module provides the minimal numeric engine the decoder runs on.
//! Tensors store multi-dimensional arrays with shape and stride information
//! in row-major order.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, source_len, hidden]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! ## Shapes Used by the Decoder
//!
//! ```text
//! token embeddings       [batch, input_size]
//! recurrent hidden state [n_layers, batch, hidden]
//! encoder outputs        [batch, source_len, hidden]
//! attention weights      [batch, source_len]
//! vocabulary scores      [batch, vocab_size]
//! ```
//!
//! Every per-step quantity is two-dimensional with the batch in front, so most
//! operations here work "per row of the last axis" and do not care about the
//! rank of the leading dimensions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stackdec::Tensor;
//!
//! let scores = Tensor::new(vec![1.0, 3.0, 2.0, 0.5, 0.1, 0.2], vec![2, 3]);
//! let probs = scores.softmax(-1);
//! assert_eq!(probs.argmax_last(), vec![1, 0]);
//! ```
//!
//! ## Shape Errors
//!
//! Operations assert shape agreement and panic on programming errors, the same
//! way a numeric engine would. Anything that depends on caller input is checked
//! earlier by the decoder and reported as a [`crate::DecoderError`].

use rayon::prelude::*;

/// A multi-dimensional array for decoder computations
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as: `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
///
/// Strides would be `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a tensor filled with a constant
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Size of the last axis (1 for scalars)
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Number of rows when the tensor is viewed as `[rows, last_dim]`
    pub fn rows(&self) -> usize {
        let last = self.last_dim();
        if last == 0 {
            0
        } else {
            self.data.len() / last
        }
    }

    /// Borrow row `i` of the `[rows, last_dim]` view
    pub fn row(&self, i: usize) -> &[f32] {
        let cols = self.last_dim();
        &self.data[i * cols..(i + 1) * cols]
    }

    /// SIMD-friendly inner loop for matrix multiplication
    ///
    /// Computes: result[j] += a_val * b[j] for all j
    #[inline(always)]
    fn matmul_inner_simd(a_val: f32, b: &[f32], result: &mut [f32]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix multiplication
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result is
    /// `[m, n]`. Small products run sequentially; larger ones use the parallel
    /// cache-blocked kernel.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2D or the inner dimensions differ
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        // Work threshold: below this the parallel overhead dominates
        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += self.data[i * k + l] * other.data[l * n + j];
                }
                result[i * n + j] = sum;
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes 8×8 blocks and distributes row blocks across cores via Rayon.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Softmax along the last axis
    ///
    /// Uses the numerically stable form:
    ///
    /// ```text
    /// softmax(x)[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    /// ```
    ///
    /// Rows are processed in parallel. Rows that are entirely `-inf` (every
    /// position masked) come back as all zeros instead of NaN.
    ///
    /// # Arguments
    ///
    /// * `axis` - Must name the last axis (`-1` or `rank - 1`)
    pub fn softmax(&self, axis: isize) -> Tensor {
        self.assert_last_axis(axis, "softmax");
        let cols = self.last_dim();

        let result: Vec<f32> = self
            .data
            .par_chunks(cols.max(1))
            .flat_map_iter(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let exp_values: Vec<f32> = if max == f32::NEG_INFINITY {
                    vec![0.0; row.len()]
                } else {
                    row.iter().map(|&x| (x - max).exp()).collect()
                };
                let sum: f32 = exp_values.iter().sum();
                let sum = if sum > 0.0 { sum } else { 1.0 };
                exp_values.into_iter().map(move |val| val / sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Log-softmax along the last axis
    ///
    /// ```text
    /// log_softmax(x)[i] = x[i] - max(x) - ln(sum(exp(x[j] - max(x))))
    /// ```
    pub fn log_softmax(&self, axis: isize) -> Tensor {
        self.assert_last_axis(axis, "log_softmax");
        let cols = self.last_dim();

        let result: Vec<f32> = self
            .data
            .par_chunks(cols.max(1))
            .flat_map_iter(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
                row.iter().map(move |&x| x - max - log_sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    fn assert_last_axis(&self, axis: isize, op: &str) {
        let rank = self.shape.len() as isize;
        let axis_pos = if axis < 0 { rank + axis } else { axis };
        assert_eq!(
            axis_pos,
            rank - 1,
            "{} is only supported along the last axis (shape {:?}, axis {})",
            op,
            self.shape,
            axis
        );
    }

    /// Index of the largest element of every row of the last axis
    ///
    /// Ties resolve to the lowest index.
    pub fn argmax_last(&self) -> Vec<usize> {
        let cols = self.last_dim();
        self.data
            .chunks(cols.max(1))
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }

    /// Element-wise addition with broadcasting support
    ///
    /// 1. **Exact match**: Same shape
    /// 2. **Broadcast last dim**: `[*, n] + [n]` (e.g., adding bias)
    pub fn add(&self, other: &Tensor) -> Tensor {
        self.zip_broadcast(other, "add", |a, b| a + b)
    }

    /// Element-wise multiplication with broadcasting
    ///
    /// See `add()` for broadcasting patterns.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        self.zip_broadcast(other, "mul", |a, b| a * b)
    }

    /// Element-wise subtraction
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for subtraction");
        self.zip_broadcast(other, "sub", |a, b| a - b)
    }

    fn zip_broadcast(&self, other: &Tensor, op: &str, f: impl Fn(f32, f32) -> f32 + Sync) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if self.shape.len() > other.shape.len() {
            let last_dim = self.last_dim();
            if other.data.len() == last_dim {
                let result: Vec<f32> = (0..self.data.len())
                    .into_par_iter()
                    .map(|i| f(self.data[i], other.data[i % last_dim]))
                    .collect();
                return Tensor::new(result, self.shape.clone());
            }
        }

        panic!(
            "Unsupported broadcast for {}: {:?} vs {:?}",
            op, self.shape, other.shape
        );
    }

    /// Add scalar to all elements
    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x + scalar)
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Apply `f` to every element
    pub fn map(&self, f: impl Fn(f32) -> f32 + Sync + Send) -> Tensor {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} to {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Transpose a 2D matrix
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "transpose expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Replace values where mask is non-zero with given value
    ///
    /// Used to hide encoder positions outside an attention window.
    pub fn masked_fill(&self, mask: &Tensor, value: f32) -> Tensor {
        assert_eq!(self.shape, mask.shape, "Mask shape must match tensor shape");
        let result = self
            .data
            .par_iter()
            .zip(&mask.data)
            .map(|(&x, &m)| if m != 0.0 { value } else { x })
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Sum of every row of the last axis
    pub fn sum_last(&self) -> Vec<f32> {
        let cols = self.last_dim();
        self.data
            .chunks(cols.max(1))
            .map(|row| row.iter().sum())
            .collect()
    }

    /// Sub-tensor at `index` along the first axis
    ///
    /// `[d0, d1, ..., dn]` → `[d1, ..., dn]`
    pub fn select(&self, index: usize) -> Tensor {
        assert!(
            index < self.shape[0],
            "Index {} out of range for leading dimension {}",
            index,
            self.shape[0]
        );
        let stride = self.strides[0];
        let start = index * stride;
        Tensor::new(
            self.data[start..start + stride].to_vec(),
            self.shape[1..].to_vec(),
        )
    }

    /// Stack equally shaped tensors along a new leading axis
    pub fn stack(parts: &[Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "Cannot stack an empty list of tensors");
        let inner = parts[0].shape.clone();
        let mut data = Vec::with_capacity(parts.len() * parts[0].data.len());
        for part in parts {
            assert_eq!(part.shape, inner, "All stacked tensors must share a shape");
            data.extend_from_slice(&part.data);
        }
        let mut shape = vec![parts.len()];
        shape.extend(inner);
        Tensor::new(data, shape)
    }

    /// Concatenate along the last axis
    ///
    /// All parts must agree on every leading dimension:
    ///
    /// ```text
    /// [b, 3] ++ [b, 5] ++ [b, 2] → [b, 10]
    /// ```
    pub fn cat_last(parts: &[&Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "Cannot concatenate an empty list of tensors");
        let lead = &parts[0].shape[..parts[0].shape.len() - 1];
        let rows = parts[0].rows();
        for part in parts {
            assert_eq!(
                &part.shape[..part.shape.len() - 1],
                lead,
                "Leading dimensions must match for concatenation"
            );
        }

        let width: usize = parts.iter().map(|p| p.last_dim()).sum();
        let mut data = Vec::with_capacity(rows * width);
        for r in 0..rows {
            for part in parts {
                data.extend_from_slice(part.row(r));
            }
        }

        let mut shape = lead.to_vec();
        shape.push(width);
        Tensor::new(data, shape)
    }

    /// Slice `len` columns starting at `start` from the last axis
    pub fn narrow_last(&self, start: usize, len: usize) -> Tensor {
        let cols = self.last_dim();
        assert!(
            start + len <= cols,
            "Slice {}..{} out of range for last dimension {}",
            start,
            start + len,
            cols
        );
        let mut data = Vec::with_capacity(self.rows() * len);
        for r in 0..self.rows() {
            data.extend_from_slice(&self.row(r)[start..start + len]);
        }
        let mut shape = self.shape.clone();
        *shape.last_mut().unwrap() = len;
        Tensor::new(data, shape)
    }

    /// Merge the direction halves of a bidirectional encoder state
    ///
    /// ```text
    /// [2 * n_layers, batch, hidden] → [n_layers, batch, 2 * hidden]
    /// ```
    ///
    /// Layer `i` of the result is row `2i` (forward) concatenated with row
    /// `2i + 1` (backward) along the hidden dimension.
    pub fn cat_directions(&self) -> Tensor {
        assert_eq!(self.shape.len(), 3, "Hidden state must be [layers, batch, hidden]");
        assert_eq!(
            self.shape[0] % 2,
            0,
            "Bidirectional hidden state needs an even number of layer slices"
        );
        let layers: Vec<Tensor> = (0..self.shape[0] / 2)
            .map(|i| Tensor::cat_last(&[&self.select(2 * i), &self.select(2 * i + 1)]))
            .collect();
        Tensor::stack(&layers)
    }
}
