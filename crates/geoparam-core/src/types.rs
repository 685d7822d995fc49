//! Sizes and numerical constants.

use crate::error::{ManifoldError, Result};
use std::fmt;

/// Shape of a parametrized tensor: optional batch dims followed by the
/// trailing matrix dims `(rows, cols)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Size {
    dims: Vec<usize>,
}

impl Size {
    /// Validates a shape.
    ///
    /// Fails with a configuration error when `dims` has fewer than two
    /// entries or any entry is zero.
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.len() < 2 {
            return Err(ManifoldError::configuration(format!(
                "size {dims:?} needs at least two dimensions"
            )));
        }
        if dims.contains(&0) {
            return Err(ManifoldError::configuration(format!(
                "size {dims:?} has a zero dimension"
            )));
        }
        Ok(Self {
            dims: dims.to_vec(),
        })
    }

    /// An unbatched `rows x cols` size.
    pub fn matrix(rows: usize, cols: usize) -> Result<Self> {
        Self::new(&[rows, cols])
    }

    /// All dimensions.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Leading batch dimensions.
    pub fn batch(&self) -> &[usize] {
        &self.dims[..self.dims.len() - 2]
    }

    /// Trailing row count.
    pub fn rows(&self) -> usize {
        self.dims[self.dims.len() - 2]
    }

    /// Trailing column count.
    pub fn cols(&self) -> usize {
        self.dims[self.dims.len() - 1]
    }

    /// `min(rows, cols)`.
    pub fn min_dim(&self) -> usize {
        self.rows().min(self.cols())
    }

    /// `max(rows, cols)`.
    pub fn max_dim(&self) -> usize {
        self.rows().max(self.cols())
    }

    /// Whether the trailing dims are equal.
    pub fn is_square(&self) -> bool {
        self.rows() == self.cols()
    }

    /// Whether there are more columns than rows.
    pub fn is_wide(&self) -> bool {
        self.rows() < self.cols()
    }

    /// Fails unless the trailing dims are equal.
    pub fn require_square(&self, manifold: &str) -> Result<()> {
        if self.is_square() {
            Ok(())
        } else {
            Err(ManifoldError::configuration(format!(
                "{manifold} requires square matrices, got size {self}"
            )))
        }
    }

    /// Fails unless `1 <= rank <= min(rows, cols)`.
    pub fn require_rank(&self, rank: usize) -> Result<()> {
        if rank >= 1 && rank <= self.min_dim() {
            Ok(())
        } else {
            Err(ManifoldError::configuration(format!(
                "rank {rank} must be in [1, {}] for size {self}",
                self.min_dim()
            )))
        }
    }

    /// Full shape with the same batch dims and new trailing dims.
    pub fn with_matrix(&self, rows: usize, cols: usize) -> Vec<usize> {
        let mut dims = self.batch().to_vec();
        dims.extend([rows, cols]);
        dims
    }

    /// The size with rows and columns swapped.
    pub fn transposed(&self) -> Self {
        Self {
            dims: self.with_matrix(self.cols(), self.rows()),
        }
    }

    /// Number of matrices in the batch.
    pub fn batch_len(&self) -> usize {
        self.batch().iter().product()
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

/// Numerical constants.
pub mod constants {
    /// Default tolerance for manifold membership checks.
    pub const DEFAULT_TOLERANCE: f64 = 1e-6;

    /// Offset added by the default softplus so singular values stay positive.
    pub const SOFTPLUS_EPSILON: f64 = 1e-6;

    /// Default sphere radius.
    pub const DEFAULT_RADIUS: f64 = 1.0;

    /// Norms below this are treated as zero when normalizing.
    pub const MIN_NORM: f64 = 1e-12;
}
