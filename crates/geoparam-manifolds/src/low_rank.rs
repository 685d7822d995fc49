//! Matrices of rank at most `r`, as `U · diag(s) · Vᵀ`.
//!
//! `U` (`m x r`) and `V` (`n x r`) are Stiefel points and `s` is a free
//! `r x 1` vector, so the rank bound holds by construction. The fixed-rank
//! and almost-orthogonal maps reuse the same factorization and only change
//! the function applied to `s`.

use crate::stiefel::Stiefel;
use crate::utils::{gaussian, sample_batch};
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    numerical::{sorted_svd, SortedSvd},
    BaseMode, Coordinates, ManifoldError, ManifoldMap, OrthogonalConfig, Result, SampleInit, Size,
};
use nalgebra::DMatrix;
use rand::RngCore;

/// The `U · diag(f(s)) · Vᵀ` factorization shared by the rank-controlled
/// maps.
///
/// Ambient order is `[U, s, V]`; base order is `[B_U, B_V]`.
#[derive(Debug, Clone)]
pub(crate) struct SvdFactors {
    pub(crate) size: Size,
    pub(crate) rank: usize,
    pub(crate) u: Stiefel,
    pub(crate) v: Stiefel,
}

impl SvdFactors {
    pub(crate) fn new(dims: &[usize], rank: usize, config: OrthogonalConfig) -> Result<Self> {
        let size = Size::new(dims)?;
        size.require_rank(rank)?;
        let u = Stiefel::new(&size.with_matrix(size.rows(), rank), config)?;
        let v = Stiefel::new(&size.with_matrix(size.cols(), rank), config)?;
        Ok(Self { size, rank, u, v })
    }

    pub(crate) fn singular_dims(&self) -> Vec<usize> {
        self.size.with_matrix(self.rank, 1)
    }

    pub(crate) fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = self.u.ambient_shapes();
        shapes.push(self.singular_dims());
        shapes.extend(self.v.ambient_shapes());
        shapes
    }

    pub(crate) fn base_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = self.u.base_shapes();
        shapes.extend(self.v.base_shapes());
        shapes
    }

    pub(crate) fn initial_bases(&self) -> Vec<Tensor> {
        let mut bases = self.u.initial_bases();
        bases.extend(self.v.initial_bases());
        bases
    }

    /// Records `U · diag(f(s)) · Vᵀ`.
    pub(crate) fn forward<F>(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId], f: F) -> NodeId
    where
        F: FnOnce(&Graph, NodeId) -> NodeId,
    {
        let u = self.u.forward(graph, &ambient[0..1], &bases[0..1]);
        let v = self.v.forward(graph, &ambient[2..3], &bases[1..2]);
        let s = f(graph, ambient[1]);
        graph.matmul(graph.scale_columns(u, s), graph.transpose(v))
    }

    /// Random factors: Stiefel samples for `U` and `V`, `s` from `singular`.
    pub(crate) fn sample<F>(
        &self,
        init: &SampleInit,
        rng: &mut dyn RngCore,
        singular: F,
    ) -> Result<Coordinates>
    where
        F: FnMut(&mut dyn RngCore) -> DMatrix<f64>,
    {
        let u = self.u.sample(init, rng)?;
        let s = sample_batch(&self.singular_dims(), rng, singular);
        let v = self.v.sample(init, rng)?;
        Ok(self.assemble(u, s, v))
    }

    pub(crate) fn sample_gaussian(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let rank = self.rank;
        self.sample(init, rng, |rng| gaussian(rank, 1, rng))
    }

    fn assemble(&self, u: Coordinates, s: Tensor, v: Coordinates) -> Coordinates {
        let mut coords = Coordinates::new(u.ambient, u.bases);
        coords.ambient.push(s);
        coords.extend(v);
        coords
    }

    /// Sorted SVD of every matrix of `target`, after checking its shape.
    pub(crate) fn decompose(&self, map: &dyn ManifoldMap, target: &Tensor) -> Result<Vec<SortedSvd>> {
        map.check_point(target)?;
        target.matrices().iter().map(sorted_svd).collect()
    }

    /// Checks that every singular value past the rank is below `eps`.
    pub(crate) fn check_rank(&self, name: &str, svds: &[SortedSvd], eps: f64) -> Result<()> {
        for svd in svds {
            if let Some(&extra) = svd.singular_values.iter().skip(self.rank).find(|&&s| s > eps) {
                return Err(ManifoldError::infeasible_target(format!(
                    "{name} target has singular value {extra:e} past rank {}",
                    self.rank
                )));
            }
        }
        Ok(())
    }

    /// Coordinates from truncated decompositions, with `s` computed from the
    /// kept singular values by `invert`.
    pub(crate) fn from_svds<F>(&self, svds: &[SortedSvd], eps: f64, mut invert: F) -> Result<Coordinates>
    where
        F: FnMut(f64) -> Result<f64>,
    {
        let r = self.rank;
        let mut s = Vec::with_capacity(svds.len());
        for svd in svds {
            let values = svd
                .singular_values
                .iter()
                .take(r)
                .map(|&sigma| invert(sigma))
                .collect::<Result<Vec<_>>>()?;
            s.push(DMatrix::from_vec(r, 1, values));
        }
        let us = Tensor::from_fn(self.u.size().dims(), |k| svds[k].u.columns(0, r).into_owned());
        let vs = Tensor::from_fn(self.v.size().dims(), |k| svds[k].v.columns(0, r).into_owned());
        let s = Tensor::from_fn(&self.singular_dims(), |k| s[k].clone());
        Ok(self.assemble(
            self.u.right_inverse(&us, eps.max(1e-9))?,
            s,
            self.v.right_inverse(&vs, eps.max(1e-9))?,
        ))
    }

    /// Splits coordinates into the `U` and `V` factor coordinates, recentres
    /// both bases and puts everything back.
    pub(crate) fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        if self.u.base_mode() == BaseMode::Fixed {
            return Ok(());
        }
        if coords.ambient.len() != 3 || coords.bases.len() != 2 {
            return Err(ManifoldError::dimension_mismatch(
                "3 ambient and 2 base tensors",
                format!("{} and {}", coords.ambient.len(), coords.bases.len()),
            ));
        }
        let mut u = Coordinates::new(vec![coords.ambient[0].clone()], vec![coords.bases[0].clone()]);
        let mut v = Coordinates::new(vec![coords.ambient[2].clone()], vec![coords.bases[1].clone()]);
        self.u.update_base(&mut u)?;
        self.v.update_base(&mut v)?;
        let s = coords.ambient[1].clone();
        *coords = self.assemble(u, s, v);
        Ok(())
    }

    pub(crate) fn base_mode(&self) -> BaseMode {
        self.u.base_mode()
    }
}

/// Matrices of rank at most `rank`.
#[derive(Debug, Clone)]
pub struct LowRank {
    factors: SvdFactors,
}

impl LowRank {
    /// Creates the map for matrices of shape `dims`.
    ///
    /// # Errors
    /// Returns a configuration error unless `1 <= rank <= min(rows, cols)`.
    pub fn new(dims: &[usize], rank: usize, config: OrthogonalConfig) -> Result<Self> {
        Ok(Self {
            factors: SvdFactors::new(dims, rank, config)?,
        })
    }

    /// The rank bound.
    pub fn rank(&self) -> usize {
        self.factors.rank
    }
}

impl ManifoldMap for LowRank {
    fn name(&self) -> &str {
        "LowRank"
    }

    fn size(&self) -> &Size {
        &self.factors.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        self.factors.ambient_shapes()
    }

    fn base_shapes(&self) -> Vec<Vec<usize>> {
        self.factors.base_shapes()
    }

    fn initial_bases(&self) -> Vec<Tensor> {
        self.factors.initial_bases()
    }

    fn base_mode(&self) -> BaseMode {
        self.factors.base_mode()
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId]) -> NodeId {
        self.factors.forward(graph, ambient, bases, |_, s| s)
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.factors.size.dims()
            && point.matrices().iter().all(|m| {
                m.singular_values()
                    .iter()
                    .filter(|&&s| s > eps)
                    .count()
                    <= self.factors.rank
            })
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        match init {
            SampleInit::Custom(sampler) => self.sample_custom(sampler, rng),
            _ => self.factors.sample_gaussian(init, rng),
        }
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        let svds = self.factors.decompose(self, target)?;
        self.factors.check_rank(self.name(), &svds, eps)?;
        self.factors.from_svds(&svds, eps, Ok)
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        self.factors.update_base(coords)
    }
}
