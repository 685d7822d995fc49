//! Symmetric matrices `{S : S = Sᵀ}`.

use crate::utils::{all_matrices, gaussian, sample_batch};
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    numerical::symmetry_error, Coordinates, ManifoldError, ManifoldMap, Result, SampleInit, Size,
};
use rand::RngCore;

/// Symmetric matrices, built as `tril(X) + tril(X, -1)ᵀ` (or the upper
/// analogue).
#[derive(Debug, Clone)]
pub struct Symmetric {
    size: Size,
    lower: bool,
}

impl Symmetric {
    /// Creates the map for square matrices of shape `dims`.
    pub fn new(dims: &[usize], lower: bool) -> Result<Self> {
        let size = Size::new(dims)?;
        size.require_square("Symmetric")?;
        Ok(Self { size, lower })
    }
}

impl ManifoldMap for Symmetric {
    fn name(&self) -> &str {
        "Symmetric"
    }

    fn size(&self) -> &Size {
        &self.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.size.dims().to_vec()]
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], _bases: &[NodeId]) -> NodeId {
        let x = ambient[0];
        let (with_diagonal, strict) = if self.lower {
            (graph.tril(x, 0), graph.tril(x, -1))
        } else {
            (graph.triu(x, 0), graph.triu(x, 1))
        };
        graph.add(with_diagonal, graph.transpose(strict))
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.size.dims() && all_matrices(point, |m| symmetry_error(m) <= eps)
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let n = self.size.rows();
        match init {
            SampleInit::Uniform => Ok(Coordinates::ambient_only(vec![sample_batch(
                self.size.dims(),
                rng,
                |rng| gaussian(n, n, rng),
            )])),
            SampleInit::Torus => Err(ManifoldError::configuration(
                "torus sampling is only defined for orthogonal and skew maps, not Symmetric",
            )),
            SampleInit::Custom(sampler) => self.sample_custom(sampler, rng),
        }
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.check_point(target)?;
        if !self.in_manifold(target, eps) {
            return Err(ManifoldError::infeasible_target("target is not symmetric"));
        }
        let lower = self.lower;
        let x = target.map(|m| {
            if lower {
                m.lower_triangle()
            } else {
                m.upper_triangle()
            }
        });
        Ok(Coordinates::ambient_only(vec![x]))
    }
}
