//! Stiefel manifold St(n,k) = {X in R^{n x k} : XᵀX = I_k}
//!
//! Orthogonal matrices are the square case `k = n`.
//!
//! # Construction
//!
//! The ambient `n x k` matrix `X` is padded with zeros to `n x n`, its
//! strictly lower triangle is turned into a skew matrix `A`, and the point is
//!
//! ```text
//!     forward(X; B) = (B · g(A))[:, :k],     g ∈ {expm, cayley}
//! ```
//!
//! where `B` is an orthogonal base frame (the identity by default). The
//! columns of `g(A)` are orthonormal to machine precision, so slicing keeps
//! them orthonormal. Wide sizes (`rows < cols`) are handled by building the
//! tall transpose.
//!
//! # Initialization
//!
//! Random points move the base frame and keep `X = 0`: a Haar-distributed
//! `B` for uniform sampling, a block-diagonal rotation for torus sampling.
//! A target `T` is reached by completing its columns to an orthogonal frame.
//!
//! # Dynamic trivialization
//!
//! With [`BaseMode::Dynamic`], `update_base` replaces `B` by the full frame
//! `B · g(A)` and resets `X` to zero. The point does not move, and the chart
//! is recentred where `g` is best conditioned.

use crate::utils::{
    all_matrices, complete_frame, haar_orthogonal, orthogonal_node, sample_batch, skew_node,
    torus_rotation,
};
use geoparam_autodiff::{Block, Graph, NodeId, Tensor};
use geoparam_core::{
    numerical::orthogonality_error, BaseMode, Coordinates, ManifoldError, ManifoldMap,
    OrthogonalConfig, Result, SampleInit, Size, Trivialization,
};
use nalgebra::DMatrix;
use rand::RngCore;
use tracing::debug;

/// Matrices with orthonormal columns (or rows, when wide).
#[derive(Debug, Clone)]
pub struct Stiefel {
    size: Size,
    /// Rows of the tall representation
    n: usize,
    /// Columns of the tall representation
    k: usize,
    transposed: bool,
    config: OrthogonalConfig,
    /// Only the block below the first `k` rows is free (Grassmannian chart)
    horizontal: bool,
    name: &'static str,
}

impl Stiefel {
    /// Creates the map for matrices of shape `dims`.
    ///
    /// # Errors
    /// Returns a configuration error if `dims` has fewer than two entries
    /// or a zero entry.
    pub fn new(dims: &[usize], config: OrthogonalConfig) -> Result<Self> {
        let size = Size::new(dims)?;
        let name = if size.is_square() {
            "Orthogonal"
        } else {
            "Stiefel"
        };
        Ok(Self::build(size, config, false, name))
    }

    /// The Grassmannian chart: only the `(n - k) x k` horizontal block of
    /// the skew generator is free.
    pub(crate) fn horizontal(dims: &[usize], config: OrthogonalConfig) -> Result<Self> {
        let size = Size::new(dims)?;
        Ok(Self::build(size, config, true, "Grassmannian"))
    }

    fn build(size: Size, config: OrthogonalConfig, horizontal: bool, name: &'static str) -> Self {
        Self {
            n: size.max_dim(),
            k: size.min_dim(),
            transposed: size.is_wide(),
            size,
            config,
            horizontal,
            name,
        }
    }

    /// The skew-to-orthogonal map.
    pub fn triv(&self) -> Trivialization {
        self.config.triv
    }

    /// Full configuration.
    pub fn config(&self) -> OrthogonalConfig {
        self.config
    }

    /// `(n, k)` with `n >= k`.
    pub fn tall_dims(&self) -> (usize, usize) {
        (self.n, self.k)
    }

    fn ambient_dims(&self) -> Vec<usize> {
        self.size.with_matrix(self.n, self.k)
    }

    fn base_dims(&self) -> Vec<usize> {
        self.size.with_matrix(self.n, self.n)
    }

    fn horizontal_mask(&self) -> DMatrix<f64> {
        let k = self.k;
        DMatrix::from_fn(self.n, self.n, |i, _| if i >= k { 1.0 } else { 0.0 })
    }

    /// Records the full `n x n` frame `B · g(A)`.
    pub fn frame(&self, graph: &Graph, x: NodeId, base: NodeId) -> NodeId {
        let (n, k) = (self.n, self.k);
        let mut padded = if k == n {
            x
        } else {
            graph.embed(x, Block::new(0, 0, n, k), n, n)
        };
        if self.horizontal {
            padded = graph.mask(padded, self.horizontal_mask());
        }
        let a = skew_node(graph, padded, true);
        let q = orthogonal_node(graph, a, self.config.triv);
        graph.matmul(base, q)
    }
}

impl ManifoldMap for Stiefel {
    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> &Size {
        &self.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.ambient_dims()]
    }

    fn base_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.base_dims()]
    }

    fn initial_bases(&self) -> Vec<Tensor> {
        vec![Tensor::identity(&self.base_dims())]
    }

    fn base_mode(&self) -> BaseMode {
        self.config.base_mode
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId]) -> NodeId {
        let frame = self.frame(graph, ambient[0], bases[0]);
        let point = if self.k == self.n {
            frame
        } else {
            graph.extract(frame, Block::new(0, 0, self.n, self.k))
        };
        if self.transposed {
            graph.transpose(point)
        } else {
            point
        }
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.size.dims() && all_matrices(point, |m| orthogonality_error(m) <= eps)
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let n = self.n;
        let base = match init {
            SampleInit::Uniform => sample_batch(&self.base_dims(), rng, |rng| haar_orthogonal(n, rng)),
            SampleInit::Torus => sample_batch(&self.base_dims(), rng, |rng| torus_rotation(n, rng)),
            SampleInit::Custom(sampler) => return self.sample_custom(sampler, rng),
        };
        Ok(Coordinates::new(
            vec![Tensor::zeros(&self.ambient_dims())],
            vec![base],
        ))
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.check_point(target)?;
        if !self.in_manifold(target, eps) {
            let error = target
                .matrices()
                .iter()
                .map(orthogonality_error)
                .fold(0.0, f64::max);
            return Err(ManifoldError::infeasible_target(format!(
                "{} target has orthogonality error {error:e} above {eps:e}",
                self.name
            )));
        }
        let tall = if self.transposed {
            target.transpose()
        } else {
            target.clone()
        };
        Ok(Coordinates::new(
            vec![Tensor::zeros(&self.ambient_dims())],
            vec![tall.map(complete_frame)],
        ))
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        if self.config.base_mode == BaseMode::Fixed {
            return Ok(());
        }
        coords.check_shapes(self)?;
        let graph = Graph::no_grad();
        let x = graph.constant(coords.ambient[0].clone());
        let base = graph.constant(coords.bases[0].clone());
        let frame = self.frame(&graph, x, base);
        let frame = graph
            .get_value(frame)
            .ok_or_else(|| ManifoldError::numerical_error("frame node missing"))?;
        if !frame.is_finite() {
            return Err(ManifoldError::numerical_error(format!(
                "{} frame is not finite, base left unchanged",
                self.name
            )));
        }
        debug!(manifold = self.name, "recentring base frame at the current point");
        coords.bases[0] = frame;
        coords.ambient[0] = Tensor::zeros(&self.ambient_dims());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoparam_autodiff::backward;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(triv: Trivialization) -> OrthogonalConfig {
        OrthogonalConfig::default().with_triv(triv)
    }

    #[test]
    fn test_names_and_dims() {
        let square = Stiefel::new(&[3, 3], OrthogonalConfig::default()).unwrap();
        assert_eq!(square.name(), "Orthogonal");
        let wide = Stiefel::new(&[2, 5], OrthogonalConfig::default()).unwrap();
        assert_eq!(wide.name(), "Stiefel");
        assert_eq!(wide.tall_dims(), (5, 2));
        assert_eq!(wide.ambient_shapes(), vec![vec![5, 2]]);
        assert_eq!(wide.base_shapes(), vec![vec![5, 5]]);
        assert!(Stiefel::new(&[0, 3], OrthogonalConfig::default()).is_err());
    }

    #[test]
    fn test_any_ambient_gives_orthonormal_columns() {
        let mut rng = StdRng::seed_from_u64(2);
        for triv in [Trivialization::Expm, Trivialization::Cayley] {
            for dims in [[1, 1], [4, 4], [5, 3], [3, 5]] {
                let map = Stiefel::new(&dims, config(triv)).unwrap();
                let custom = SampleInit::custom(|shape, rng| {
                    crate::utils::sample_batch(shape, rng, |rng| {
                        crate::utils::gaussian(shape[0], shape[1], rng)
                    })
                });
                let coords = map.sample(&custom, &mut rng).unwrap();
                let point = map.evaluate(&coords).unwrap();
                assert!(map.in_manifold(&point, 1e-9), "{dims:?} {triv}");
            }
        }
    }

    #[test]
    fn test_right_inverse_round_trip() {
        let mut rng = StdRng::seed_from_u64(4);
        let map = Stiefel::new(&[2, 3, 5], OrthogonalConfig::default()).unwrap();
        let target = map
            .evaluate(&map.sample(&SampleInit::Uniform, &mut rng).unwrap())
            .unwrap();
        let coords = map.right_inverse(&target, 1e-9).unwrap();
        assert_relative_eq!(
            map.evaluate(&coords).unwrap().matrices()[1],
            target.matrices()[1],
            epsilon = 1e-12
        );

        let off = Tensor::from_element(&[2, 3, 5], 1.0);
        assert!(map.right_inverse(&off, 1e-6).unwrap_err().is_infeasible_target());
    }

    #[test]
    fn test_dynamic_update_keeps_point() {
        let map = Stiefel::new(
            &[4, 2],
            OrthogonalConfig::default().with_base_mode(BaseMode::Dynamic),
        )
        .unwrap();
        let x = Tensor::from_fn(&[4, 2], |_| {
            DMatrix::from_fn(4, 2, |i, j| 0.3 * (i as f64) - 0.2 * (j as f64))
        });
        let mut coords = Coordinates::new(vec![x], map.initial_bases());
        let before = map.evaluate(&coords).unwrap();
        map.update_base(&mut coords).unwrap();
        assert_eq!(coords.ambient[0], Tensor::zeros(&[4, 2]));
        assert_relative_eq!(
            map.evaluate(&coords).unwrap().matrix(),
            before.matrix(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_gradient_ignores_upper_triangle() {
        let map = Stiefel::new(&[3, 3], OrthogonalConfig::default()).unwrap();
        let graph = Graph::new();
        let x = graph.variable(Tensor::from_element(&[3, 3], 0.1));
        let b = graph.constant(Tensor::identity(&[3, 3]));
        let w = graph.constant(Tensor::from_row_slice(
            3,
            3,
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        ));
        let q = map.forward(&graph, &[x], &[b]);
        let loss = graph.sum(graph.mul(q, w));
        let grads = backward(&graph, loss, None);
        let g = grads[&x].matrix();
        assert_eq!(g[(0, 1)], 0.0);
        assert_eq!(g[(0, 0)], 0.0);
        assert!(g[(1, 0)].abs() > 1.0);
        assert!(!grads.contains_key(&b));
    }
}
