//! Numerical checks and decompositions shared by the manifold maps.

use crate::error::{ManifoldError, Result};
use nalgebra::{DMatrix, DVector};

/// A thin SVD with singular values sorted in decreasing order.
#[derive(Debug, Clone)]
pub struct SortedSvd {
    /// Left singular vectors, `m x min(m, n)`
    pub u: DMatrix<f64>,
    /// Singular values, decreasing
    pub singular_values: DVector<f64>,
    /// Right singular vectors, `n x min(m, n)`
    pub v: DMatrix<f64>,
}

/// Thin SVD of `m`, sorted.
pub fn sorted_svd(m: &DMatrix<f64>) -> Result<SortedSvd> {
    let svd = m.clone().svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(ManifoldError::numerical_error("SVD did not return singular vectors"));
    };
    let s = svd.singular_values;
    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

    let v = v_t.transpose();
    Ok(SortedSvd {
        u: DMatrix::from_fn(u.nrows(), order.len(), |i, j| u[(i, order[j])]),
        singular_values: DVector::from_fn(order.len(), |i, _| s[order[i]]),
        v: DMatrix::from_fn(v.nrows(), order.len(), |i, j| v[(i, order[j])]),
    })
}

/// Symmetric eigendecomposition with eigenvalues sorted in decreasing
/// order. Returns `(eigenvalues, eigenvectors)`.
pub fn sorted_eigh(m: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let eig = m.clone().symmetric_eigen();
    let values = eig.eigenvalues;
    let vectors = eig.eigenvectors;
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    (
        DVector::from_fn(order.len(), |i, _| values[order[i]]),
        DMatrix::from_fn(vectors.nrows(), order.len(), |i, j| vectors[(i, order[j])]),
    )
}

/// `max |XᵀX - I|` for a tall `X`, or `max |XXᵀ - I|` for a wide one.
pub fn orthogonality_error(x: &DMatrix<f64>) -> f64 {
    let gram = if x.nrows() >= x.ncols() {
        x.tr_mul(x)
    } else {
        x * x.transpose()
    };
    let n = gram.nrows();
    (gram - DMatrix::<f64>::identity(n, n)).amax()
}

/// `max |X + Xᵀ|`.
pub fn skew_error(x: &DMatrix<f64>) -> f64 {
    if !x.is_square() {
        return f64::INFINITY;
    }
    (x + x.transpose()).amax()
}

/// `max |X - Xᵀ|`.
pub fn symmetry_error(x: &DMatrix<f64>) -> f64 {
    if !x.is_square() {
        return f64::INFINITY;
    }
    (x - x.transpose()).amax()
}

/// Number of singular values above `tolerance`.
pub fn numerical_rank(x: &DMatrix<f64>, tolerance: f64) -> usize {
    x.singular_values().iter().filter(|&&s| s > tolerance).count()
}

/// Whether `x` is symmetric positive semidefinite within `eps`, with at most
/// `rank` eigenvalues above `eps`.
pub fn is_psd(x: &DMatrix<f64>, rank: usize, eps: f64) -> bool {
    if symmetry_error(x) > eps {
        return false;
    }
    let (values, _) = sorted_eigh(x);
    values.iter().all(|&l| l >= -eps) && values.iter().skip(rank).all(|&l| l <= eps)
}

/// Whether every entry is finite.
pub fn is_finite(x: &DMatrix<f64>) -> bool {
    x.iter().all(|v| v.is_finite())
}
