//! Batched matrix tensors.
//!
//! A [`Tensor`] is a stack of equally shaped `f64` matrices indexed by zero or
//! more leading batch dimensions. Its shape is the batch shape followed by
//! `(rows, cols)`, so every tensor is at least two dimensional. Vectors are
//! stored as `n x 1` columns.

use nalgebra::DMatrix;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Batch sizes from which per-matrix maps run on the rayon pool.
#[cfg(feature = "parallel")]
const PARALLEL_BATCH_THRESHOLD: usize = 8;

/// Errors raised while assembling tensors from raw parts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    /// The number of matrices does not match the batch shape.
    #[error("batch shape {batch:?} holds {expected} matrices, got {actual}")]
    BatchLength {
        /// Requested batch shape
        batch: Vec<usize>,
        /// Matrices implied by the batch shape
        expected: usize,
        /// Matrices provided
        actual: usize,
    },

    /// Matrices in one batch do not share a shape.
    #[error("matrix {index} has shape ({rows}, {cols}), expected ({expected_rows}, {expected_cols})")]
    RaggedBatch {
        /// Offending matrix index
        index: usize,
        /// Its rows
        rows: usize,
        /// Its columns
        cols: usize,
        /// Rows of the first matrix
        expected_rows: usize,
        /// Columns of the first matrix
        expected_cols: usize,
    },
}

/// A batch of real matrices.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    batch: Vec<usize>,
    data: Vec<DMatrix<f64>>,
}

impl Tensor {
    /// Wraps a single matrix (empty batch shape).
    pub fn from_matrix(matrix: DMatrix<f64>) -> Self {
        Self {
            batch: Vec::new(),
            data: vec![matrix],
        }
    }

    /// Builds a tensor from a batch shape and its matrices in row-major
    /// batch order.
    pub fn from_matrices(
        batch: Vec<usize>,
        data: Vec<DMatrix<f64>>,
    ) -> Result<Self, TensorError> {
        let expected: usize = batch.iter().product();
        if expected != data.len() || data.is_empty() {
            return Err(TensorError::BatchLength {
                batch,
                expected,
                actual: data.len(),
            });
        }
        let (rows, cols) = data[0].shape();
        if let Some((index, m)) = data
            .iter()
            .enumerate()
            .find(|(_, m)| m.shape() != (rows, cols))
        {
            return Err(TensorError::RaggedBatch {
                index,
                rows: m.nrows(),
                cols: m.ncols(),
                expected_rows: rows,
                expected_cols: cols,
            });
        }
        Ok(Self { batch, data })
    }

    /// Builds a tensor of the given shape whose `k`-th matrix is `f(k)`.
    ///
    /// # Panics
    /// Panics if `shape` has fewer than two dimensions or `f` returns a
    /// matrix of the wrong size.
    pub fn from_fn<F>(shape: &[usize], mut f: F) -> Self
    where
        F: FnMut(usize) -> DMatrix<f64>,
    {
        let (batch, rows, cols) = split_shape(shape);
        let count: usize = batch.iter().product();
        let data = (0..count)
            .map(|k| {
                let m = f(k);
                assert_eq!(m.shape(), (rows, cols), "from_fn produced a matrix of the wrong shape");
                m
            })
            .collect();
        Self { batch, data }
    }

    /// A tensor filled with `value`.
    pub fn from_element(shape: &[usize], value: f64) -> Self {
        let (_, rows, cols) = split_shape(shape);
        Self::from_fn(shape, |_| DMatrix::from_element(rows, cols, value))
    }

    /// A zero tensor.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_element(shape, 0.0)
    }

    /// Identity matrices broadcast over the batch. Trailing dims may be
    /// rectangular, in which case the leading diagonal is set.
    pub fn identity(shape: &[usize]) -> Self {
        let (_, rows, cols) = split_shape(shape);
        Self::from_fn(shape, |_| DMatrix::identity(rows, cols))
    }

    /// A single matrix from row-major values.
    pub fn from_row_slice(rows: usize, cols: usize, values: &[f64]) -> Self {
        Self::from_matrix(DMatrix::from_row_slice(rows, cols, values))
    }

    /// A scalar stored as a `1 x 1` matrix.
    pub fn scalar(value: f64) -> Self {
        Self::from_matrix(DMatrix::from_element(1, 1, value))
    }

    /// Full shape: batch dims followed by `(rows, cols)`.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = self.batch.clone();
        shape.push(self.nrows());
        shape.push(self.ncols());
        shape
    }

    /// Leading batch dimensions.
    pub fn batch_shape(&self) -> &[usize] {
        &self.batch
    }

    /// Number of stacked matrices.
    pub fn batch_len(&self) -> usize {
        self.data.len()
    }

    /// Rows of every matrix.
    pub fn nrows(&self) -> usize {
        self.data[0].nrows()
    }

    /// Columns of every matrix.
    pub fn ncols(&self) -> usize {
        self.data[0].ncols()
    }

    /// The stacked matrices.
    pub fn matrices(&self) -> &[DMatrix<f64>] {
        &self.data
    }

    /// Mutable access to the stacked matrices.
    pub fn matrices_mut(&mut self) -> &mut [DMatrix<f64>] {
        &mut self.data
    }

    /// The first matrix; the only one for unbatched tensors.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data[0]
    }

    /// Consumes the tensor and returns its matrices.
    pub fn into_matrices(self) -> Vec<DMatrix<f64>> {
        self.data
    }

    /// Value of a scalar tensor.
    pub fn to_scalar(&self) -> f64 {
        debug_assert_eq!(self.shape(), vec![1, 1], "to_scalar on a non-scalar tensor");
        self.data[0][(0, 0)]
    }

    /// Applies `f` to every matrix, keeping the batch shape.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(&DMatrix<f64>) -> DMatrix<f64> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        if self.data.len() >= PARALLEL_BATCH_THRESHOLD {
            return Self {
                batch: self.batch.clone(),
                data: self.data.par_iter().map(f).collect(),
            };
        }
        Self {
            batch: self.batch.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Applies `f` to matching pairs of matrices.
    ///
    /// # Panics
    /// Panics if the batch shapes differ.
    pub fn zip_map<F>(&self, other: &Self, f: F) -> Self
    where
        F: Fn(&DMatrix<f64>, &DMatrix<f64>) -> DMatrix<f64> + Sync + Send,
    {
        assert_eq!(
            self.batch, other.batch,
            "batch shapes {:?} and {:?} differ",
            self.batch, other.batch
        );
        #[cfg(feature = "parallel")]
        if self.data.len() >= PARALLEL_BATCH_THRESHOLD {
            return Self {
                batch: self.batch.clone(),
                data: self
                    .data
                    .par_iter()
                    .zip(other.data.par_iter())
                    .map(|(a, b)| f(a, b))
                    .collect(),
            };
        }
        Self {
            batch: self.batch.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(a, b))
                .collect(),
        }
    }

    /// Applies a scalar function to every entry.
    pub fn map_elements<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        self.map(|m| m.map(&f))
    }

    /// Entry-wise product.
    pub fn component_mul(&self, other: &Self) -> Self {
        self.zip_map(other, |a, b| a.component_mul(b))
    }

    /// Multiplies every entry by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        self.map(|m| m * factor)
    }

    /// Batched transpose.
    pub fn transpose(&self) -> Self {
        self.map(|m| m.transpose())
    }

    /// Sum of every entry over the whole batch.
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|m| m.sum()).sum()
    }

    /// Frobenius norm over the whole batch.
    pub fn norm(&self) -> f64 {
        self.data
            .iter()
            .map(|m| m.norm_squared())
            .sum::<f64>()
            .sqrt()
    }

    /// Largest absolute entry.
    pub fn max_abs(&self) -> f64 {
        self.data
            .iter()
            .flat_map(|m| m.iter())
            .fold(0.0_f64, |acc, x| acc.max(x.abs()))
    }

    /// Whether every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|m| m.iter().all(|x| x.is_finite()))
    }
}

fn split_shape(shape: &[usize]) -> (Vec<usize>, usize, usize) {
    assert!(
        shape.len() >= 2,
        "tensor shape {shape:?} needs at least two dimensions"
    );
    let n = shape.len();
    (shape[..n - 2].to_vec(), shape[n - 2], shape[n - 1])
}

impl From<DMatrix<f64>> for Tensor {
    fn from(matrix: DMatrix<f64>) -> Self {
        Self::from_matrix(matrix)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("data", &self.data)
            .finish()
    }
}

impl Add for &Tensor {
    type Output = Tensor;

    fn add(self, rhs: Self) -> Tensor {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl Sub for &Tensor {
    type Output = Tensor;

    fn sub(self, rhs: Self) -> Tensor {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl Neg for &Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        self.map(|m| -m)
    }
}

/// Batched matrix product.
impl Mul for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: Self) -> Tensor {
        self.zip_map(rhs, |a, b| a * b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shape_of_batched_tensor() {
        let t = Tensor::zeros(&[2, 3, 4, 5]);
        assert_eq!(t.shape(), vec![2, 3, 4, 5]);
        assert_eq!(t.batch_shape(), &[2, 3]);
        assert_eq!(t.batch_len(), 6);
        assert_eq!((t.nrows(), t.ncols()), (4, 5));
    }

    #[test]
    fn test_from_matrices_rejects_ragged_batch() {
        let err = Tensor::from_matrices(
            vec![2],
            vec![DMatrix::zeros(2, 2), DMatrix::zeros(3, 2)],
        )
        .unwrap_err();
        assert!(matches!(err, TensorError::RaggedBatch { index: 1, .. }));

        let err = Tensor::from_matrices(vec![3], vec![DMatrix::zeros(2, 2)]).unwrap_err();
        assert!(matches!(err, TensorError::BatchLength { expected: 3, actual: 1, .. }));
    }

    #[test]
    #[should_panic(expected = "at least two dimensions")]
    fn test_vector_shape_panics() {
        let _ = Tensor::zeros(&[4]);
    }

    #[test]
    fn test_batched_matmul_and_reductions() {
        let a = Tensor::from_fn(&[2, 2, 2], |k| DMatrix::identity(2, 2) * (k as f64 + 1.0));
        let b = Tensor::from_element(&[2, 2, 2], 1.0);
        let c = &a * &b;
        assert_eq!(c.matrices()[0], DMatrix::from_element(2, 2, 1.0));
        assert_eq!(c.matrices()[1], DMatrix::from_element(2, 2, 2.0));
        assert_eq!(c.sum(), 12.0);
        assert_eq!(c.max_abs(), 2.0);
    }

    #[test]
    #[should_panic(expected = "batch shapes")]
    fn test_zip_map_checks_batch() {
        let a = Tensor::zeros(&[2, 2, 2]);
        let b = Tensor::zeros(&[3, 2, 2]);
        let _ = &a + &b;
    }
}
