//! Skew-symmetric matrices `{A : A + Aᵀ = 0}`.
//!
//! The map keeps the strictly lower triangle of the ambient matrix and
//! mirrors it with a sign flip, so skew-symmetry is exact by construction.
//! The upper triangle (or the lower one when `lower = false`) is ignored.

use crate::utils::{all_matrices, gaussian, sample_batch, skew_node, torus_skew};
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    numerical::skew_error, Coordinates, ManifoldError, ManifoldMap, Result, SampleInit, Size,
};
use rand::RngCore;

/// Skew-symmetric matrices.
#[derive(Debug, Clone)]
pub struct Skew {
    size: Size,
    lower: bool,
}

impl Skew {
    /// Creates the map for square matrices of shape `dims`.
    ///
    /// # Errors
    /// Returns a configuration error for rectangular or invalid sizes.
    pub fn new(dims: &[usize], lower: bool) -> Result<Self> {
        let size = Size::new(dims)?;
        size.require_square("Skew")?;
        Ok(Self { size, lower })
    }

    /// Whether the lower triangle carries the free values.
    pub fn lower(&self) -> bool {
        self.lower
    }
}

impl ManifoldMap for Skew {
    fn name(&self) -> &str {
        "Skew"
    }

    fn size(&self) -> &Size {
        &self.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.size.dims().to_vec()]
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], _bases: &[NodeId]) -> NodeId {
        skew_node(graph, ambient[0], self.lower)
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.size.dims() && all_matrices(point, |m| skew_error(m) <= eps)
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let n = self.size.rows();
        let x = match init {
            SampleInit::Uniform => sample_batch(self.size.dims(), rng, |rng| gaussian(n, n, rng)),
            SampleInit::Torus => {
                // torus_skew fills the first subdiagonal; mirror it for `lower = false`
                let lower = self.lower;
                sample_batch(self.size.dims(), rng, |rng| {
                    let a = torus_skew(n, rng);
                    if lower {
                        a
                    } else {
                        a.transpose()
                    }
                })
            }
            SampleInit::Custom(sampler) => return self.sample_custom(sampler, rng),
        };
        Ok(Coordinates::ambient_only(vec![x]))
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.check_point(target)?;
        if !self.in_manifold(target, eps) {
            return Err(ManifoldError::infeasible_target(format!(
                "skew error {} exceeds {eps}",
                target.matrices().iter().map(skew_error).fold(0.0, f64::max)
            )));
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
