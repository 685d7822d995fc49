//! Shared primitives: skew and orthogonal generators, Haar and torus
//! sampling, frame completion.

use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::Trivialization;
use nalgebra::DMatrix;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;

/// Records `L - Lᵀ` where `L` is the strictly lower (or upper) triangle of `x`.
pub fn skew_node(graph: &Graph, x: NodeId, lower: bool) -> NodeId {
    let half = if lower {
        graph.tril(x, -1)
    } else {
        graph.triu(x, 1)
    };
    graph.sub(half, graph.transpose(half))
}

/// Records the orthogonal matrix generated by the skew matrix `a`.
pub fn orthogonal_node(graph: &Graph, a: NodeId, triv: Trivialization) -> NodeId {
    match triv {
        Trivialization::Expm => graph.expm(a),
        Trivialization::Cayley => graph.cayley(a),
    }
}

/// A matrix with i.i.d. standard normal entries.
pub fn gaussian(rows: usize, cols: usize, rng: &mut dyn RngCore) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| StandardNormal.sample(&mut *rng))
}

/// A Haar-distributed orthogonal matrix.
///
/// QR of a Gaussian matrix, with the sign of each column fixed by the
/// diagonal of `R` so the distribution is exactly uniform.
pub fn haar_orthogonal(n: usize, rng: &mut dyn RngCore) -> DMatrix<f64> {
    let qr = gaussian(n, n, rng).qr();
    let r = qr.r();
    let mut q = qr.q();
    for j in 0..n {
        if r[(j, j)] < 0.0 {
            q.column_mut(j).neg_mut();
        }
    }
    q
}

/// A skew matrix made of `2x2` blocks `[[0, -θ], [θ, 0]]`, `θ ~ U[-π, π]`.
/// The last row and column are zero when `n` is odd.
pub fn torus_skew(n: usize, rng: &mut dyn RngCore) -> DMatrix<f64> {
    let mut a = DMatrix::zeros(n, n);
    for i in (0..n.saturating_sub(1)).step_by(2) {
        let theta = rng.gen_range(-PI..PI);
        a[(i + 1, i)] = theta;
        a[(i, i + 1)] = -theta;
    }
    a
}

/// Block-diagonal `2x2` rotations with uniform angles, the exponential of
/// [`torus_skew`].
pub fn torus_rotation(n: usize, rng: &mut dyn RngCore) -> DMatrix<f64> {
    let mut q = DMatrix::identity(n, n);
    for i in (0..n.saturating_sub(1)).step_by(2) {
        let (sin, cos) = rng.gen_range(-PI..PI).sin_cos();
        q[(i, i)] = cos;
        q[(i, i + 1)] = -sin;
        q[(i + 1, i)] = sin;
        q[(i + 1, i + 1)] = cos;
    }
    q
}

/// Extends the orthonormal columns of `frame` (`n x k`) to an `n x n`
/// orthogonal matrix whose first `k` columns are `frame`.
pub fn complete_frame(frame: &DMatrix<f64>) -> DMatrix<f64> {
    let (n, k) = frame.shape();
    let mut stacked = DMatrix::zeros(n, n + k);
    stacked.columns_mut(0, k).copy_from(frame);
    stacked.columns_mut(k, n).fill_with_identity();

    let qr = stacked.qr();
    let r = qr.r();
    let mut q = qr.q();
    // QR of [T | I] reproduces T up to column signs
    for j in 0..k {
        if r[(j, j)] < 0.0 {
            q.column_mut(j).neg_mut();
        }
    }
    q.columns_mut(0, k).copy_from(frame);
    q
}

/// A tensor of shape `dims` whose matrices are drawn one by one with `f`.
pub fn sample_batch<F>(dims: &[usize], rng: &mut dyn RngCore, mut f: F) -> Tensor
where
    F: FnMut(&mut dyn RngCore) -> DMatrix<f64>,
{
    Tensor::from_fn(dims, |_| f(&mut *rng))
}

/// Whether `check` holds for every matrix of the batch.
pub fn all_matrices<F>(point: &Tensor, check: F) -> bool
where
    F: Fn(&DMatrix<f64>) -> bool,
{
    point.matrices().iter().all(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoparam_core::numerical::{orthogonality_error, skew_error};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_haar_is_orthogonal() {
        let mut rng = StdRng::seed_from_u64(1);
        for n in [1, 2, 5] {
            assert!(orthogonality_error(&haar_orthogonal(n, &mut rng)) < 1e-12);
        }
    }

    #[test]
    fn test_torus_rotation_is_exp_of_torus_skew() {
        let mut a_rng = StdRng::seed_from_u64(3);
        let mut q_rng = StdRng::seed_from_u64(3);
        let a = torus_skew(5, &mut a_rng);
        let q = torus_rotation(5, &mut q_rng);
        assert!(skew_error(&a) < 1e-15);
        assert_relative_eq!(a.exp(), q, epsilon = 1e-12);
        assert_relative_eq!(q[(4, 4)], 1.0);
    }

    #[test]
    fn test_complete_frame_keeps_columns() {
        let mut rng = StdRng::seed_from_u64(9);
        let q = haar_orthogonal(5, &mut rng);
        let frame = q.columns(0, 2).into_owned();
        let full = complete_frame(&frame);
        assert!(orthogonality_error(&full) < 1e-12);
        assert_relative_eq!(full.columns(0, 2).into_owned(), frame);
    }

    #[test]
    fn test_skew_node_ignores_upper_triangle() {
        let graph = Graph::no_grad();
        let x = graph.constant(Tensor::from_row_slice(2, 2, &[1.0, 9.0, 3.0, 4.0]));
        let a = graph.get_value(skew_node(&graph, x, true)).unwrap();
        assert_eq!(a, Tensor::from_row_slice(2, 2, &[0.0, -3.0, 3.0, 0.0]));
        let a = graph.get_value(skew_node(&graph, x, false)).unwrap();
        assert_eq!(a, Tensor::from_row_slice(2, 2, &[0.0, 9.0, -9.0, 0.0]));
    }
}
