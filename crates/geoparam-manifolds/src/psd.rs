//! Positive semidefinite matrices of rank `r`: `Q · diag(f(λ)) · Qᵀ`.
//!
//! `Q` is an `n x r` Stiefel point and `f` maps the free eigenvalue vector
//! into the positive reals. With the default softplus the matrix has exactly
//! `r` positive eigenvalues; with `r = n` it is positive definite.

use crate::stiefel::Stiefel;
use crate::utils::{gaussian, sample_batch};
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    numerical::{is_psd, sorted_eigh, symmetry_error},
    BaseMode, Coordinates, ManifoldError, ManifoldMap, OrthogonalConfig, PositiveMap, Result,
    SampleInit, Size,
};
use nalgebra::DMatrix;
use rand::RngCore;

/// Symmetric positive semidefinite matrices with `rank` positive
/// eigenvalues.
#[derive(Debug, Clone)]
pub struct PositiveSemidefinite {
    size: Size,
    rank: usize,
    q: Stiefel,
    f: PositiveMap,
}

impl PositiveSemidefinite {
    /// Creates the map for square matrices of shape `dims`. `rank = None`
    /// means full rank.
    ///
    /// # Errors
    /// Returns a configuration error for a non-square or rank-incompatible
    /// shape, for a map that can go negative, and for a full-rank map that
    /// can reach zero.
    pub fn new(
        dims: &[usize],
        rank: Option<usize>,
        f: PositiveMap,
        config: OrthogonalConfig,
    ) -> Result<Self> {
        let size = Size::new(dims)?;
        size.require_square("PositiveSemidefinite")?;
        let rank = rank.unwrap_or(size.rows());
        size.require_rank(rank)?;
        if rank == size.rows() {
            f.validate()?;
        } else if f.lower_bound() < 0.0 {
            return Err(ManifoldError::configuration(format!(
                "eigenvalue map {f:?} can produce negative eigenvalues"
            )));
        }
        let q = Stiefel::new(&size.with_matrix(size.rows(), rank), config)?;
        Ok(Self { size, rank, q, f })
    }

    /// Number of positive eigenvalues.
    pub fn rank(&self) -> usize {
        self.rank
    }

    fn eigen_dims(&self) -> Vec<usize> {
        self.size.with_matrix(self.rank, 1)
    }
}

impl ManifoldMap for PositiveSemidefinite {
    fn name(&self) -> &str {
        "PositiveSemidefinite"
    }

    fn size(&self) -> &Size {
        &self.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = self.q.ambient_shapes();
        shapes.push(self.eigen_dims());
        shapes
    }

    fn base_shapes(&self) -> Vec<Vec<usize>> {
        self.q.base_shapes()
    }

    fn initial_bases(&self) -> Vec<Tensor> {
        self.q.initial_bases()
    }

    fn base_mode(&self) -> BaseMode {
        self.q.base_mode()
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId]) -> NodeId {
        let q = self.q.forward(graph, &ambient[0..1], bases);
        let lambda = self.f.apply(graph, ambient[1]);
        graph.matmul(graph.scale_columns(q, lambda), graph.transpose(q))
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.size.dims()
            && point.matrices().iter().all(|m| is_psd(m, self.rank, eps))
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        if let SampleInit::Custom(sampler) = init {
            return self.sample_custom(sampler, rng);
        }
        let mut coords = self.q.sample(init, rng)?;
        let rank = self.rank;
        coords
            .ambient
            .push(sample_batch(&self.eigen_dims(), rng, |rng| gaussian(rank, 1, rng)));
        Ok(coords)
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.check_point(target)?;
        if !self.in_manifold(target, eps) {
            return Err(ManifoldError::infeasible_target(format!(
                "target is not positive semidefinite of rank at most {} (symmetry error {:e})",
                self.rank,
                target.matrices().iter().map(symmetry_error).fold(0.0, f64::max)
            )));
        }
        let r = self.rank;
        let mut frames = Vec::with_capacity(target.batch_len());
        let mut eigenvalues = Vec::with_capacity(target.batch_len());
        for m in target.matrices() {
            let (values, vectors) = sorted_eigh(m);
            let lambda = values
                .iter()
                .take(r)
                .map(|&l| self.f.inverse(l))
                .collect::<Result<Vec<_>>>()?;
            eigenvalues.push(DMatrix::from_vec(r, 1, lambda));
            frames.push(vectors.columns(0, r).into_owned());
        }
        let frames = Tensor::from_fn(self.q.size().dims(), |k| frames[k].clone());
        let mut coords = self.q.right_inverse(&frames, eps.max(1e-9))?;
        coords
            .ambient
            .push(Tensor::from_fn(&self.eigen_dims(), |k| eigenvalues[k].clone()));
        Ok(coords)
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        if self.q.base_mode() == BaseMode::Fixed {
            return Ok(());
        }
        coords.check_shapes(self)?;
        let lambda = coords.ambient.pop();
        self.q.update_base(coords)?;
        coords.ambient.extend(lambda);
        Ok(())
    }
}
