//! Grassmannian Gr(n,k): k-dimensional subspaces of R^n
//!
//! A subspace is represented by an orthonormal frame `Y` (`n x k`), so
//! points are Stiefel points. Two frames spanning the same subspace differ by
//! a `k x k` rotation, and moving along those directions does not change the
//! subspace. The chart therefore only frees the horizontal block of the skew
//! generator:
//!
//! ```text
//!     A = [[0, -Xᵀ], [X, 0]],   X ∈ R^{(n-k) x k}
//! ```
//!
//! which keeps the parametrization of dimension `k(n - k)`.

use crate::stiefel::Stiefel;
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    BaseMode, Coordinates, ManifoldMap, OrthogonalConfig, Result, SampleInit, Size,
};
use rand::RngCore;

/// Subspaces represented by orthonormal frames.
#[derive(Debug, Clone)]
pub struct Grassmannian {
    chart: Stiefel,
}

impl Grassmannian {
    /// Creates the map for frames of shape `dims`.
    ///
    /// Wide sizes represent subspaces by orthonormal rows.
    pub fn new(dims: &[usize], config: OrthogonalConfig) -> Result<Self> {
        Ok(Self {
            chart: Stiefel::horizontal(dims, config)?,
        })
    }

    /// Intrinsic dimension `k(n - k)`.
    pub fn dimension(&self) -> usize {
        let (n, k) = self.chart.tall_dims();
        k * (n - k)
    }
}

impl ManifoldMap for Grassmannian {
    fn name(&self) -> &str {
        self.chart.name()
    }

    fn size(&self) -> &Size {
        self.chart.size()
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        self.chart.ambient_shapes()
    }

    fn base_shapes(&self) -> Vec<Vec<usize>> {
        self.chart.base_shapes()
    }

    fn initial_bases(&self) -> Vec<Tensor> {
        self.chart.initial_bases()
    }

    fn base_mode(&self) -> BaseMode {
        self.chart.base_mode()
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId]) -> NodeId {
        self.chart.forward(graph, ambient, bases)
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        self.chart.in_manifold(point, eps)
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        self.chart.sample(init, rng)
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.chart.right_inverse(target, eps)
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        self.chart.update_base(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoparam_autodiff::backward;

    #[test]
    fn test_dimension() {
        let map = Grassmannian::new(&[5, 2], OrthogonalConfig::default()).unwrap();
        assert_eq!(map.dimension(), 6);
        assert_eq!(map.name(), "Grassmannian");
        let wide = Grassmannian::new(&[2, 5], OrthogonalConfig::default()).unwrap();
        assert_eq!(wide.dimension(), 6);
    }

    #[test]
    fn test_vertical_entries_do_not_move_the_point() {
        let map = Grassmannian::new(&[4, 2], OrthogonalConfig::default()).unwrap();
        let mut coords = Coordinates::new(vec![Tensor::zeros(&[4, 2])], map.initial_bases());
        let origin = map.evaluate(&coords).unwrap();
        // (1, 0) lies in the top k x k block
        coords.ambient[0].matrices_mut()[0][(1, 0)] = 0.7;
        assert_eq!(map.evaluate(&coords).unwrap(), origin);
        coords.ambient[0].matrices_mut()[0][(3, 1)] = 0.7;
        let moved = map.evaluate(&coords).unwrap();
        assert!(map.in_manifold(&moved, 1e-12));
        assert!((moved.matrix() - origin.matrix()).amax() > 0.1);
    }

    #[test]
    fn test_gradient_vanishes_on_vertical_block() {
        let map = Grassmannian::new(&[3, 1], OrthogonalConfig::default()).unwrap();
        let graph = Graph::new();
        let x = graph.variable(Tensor::from_row_slice(3, 1, &[0.4, 0.3, -0.2]));
        let b = graph.constant(Tensor::identity(&[3, 3]));
        let y = map.forward(&graph, &[x], &[b]);
        let loss = graph.sum(y);
        let grads = backward(&graph, loss, None);
        let g = grads[&x].matrix();
        assert_relative_eq!(g[(0, 0)], 0.0);
        assert!(g[(1, 0)].abs() > 0.0);
    }
}
