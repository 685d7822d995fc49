//! Almost-orthogonal matrices: singular values in `[1 - λ, 1 + λ]`.
//!
//! The point is `U · diag(1 + λ f(s)) · Vᵀ` with `f` into `[-1, 1]`, so the
//! matrix may contract or expand by at most `λ` in any direction. `λ = 0`
//! recovers orthogonal matrices.

use crate::low_rank::SvdFactors;
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    BaseMode, BoundedMap, Coordinates, ManifoldError, ManifoldMap, OrthogonalConfig, Result,
    SampleInit, Size,
};
use nalgebra::DMatrix;
use rand::RngCore;

/// Matrices whose singular values lie within `λ` of one.
#[derive(Debug, Clone)]
pub struct AlmostOrthogonal {
    factors: SvdFactors,
    lam: f64,
    f: BoundedMap,
}

impl AlmostOrthogonal {
    /// Creates the map for matrices of shape `dims`.
    ///
    /// # Errors
    /// Returns a configuration error unless `0 <= lam <= 1`.
    pub fn new(dims: &[usize], lam: f64, f: BoundedMap, config: OrthogonalConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&lam) {
            return Err(ManifoldError::configuration(format!(
                "almost-orthogonal bound must lie in [0, 1], got {lam}"
            )));
        }
        let size = Size::new(dims)?;
        Ok(Self {
            factors: SvdFactors::new(dims, size.min_dim(), config)?,
            lam,
            f,
        })
    }

    /// The bound `λ`.
    pub fn lam(&self) -> f64 {
        self.lam
    }

    fn invert(&self, sigma: f64, eps: f64) -> Result<f64> {
        if self.lam == 0.0 {
            return if (sigma - 1.0).abs() <= eps {
                Ok(0.0)
            } else {
                Err(ManifoldError::infeasible_target(format!(
                    "singular value {sigma} of an orthogonal target differs from 1"
                )))
            };
        }
        self.f.inverse((sigma - 1.0) / self.lam)
    }
}

impl ManifoldMap for AlmostOrthogonal {
    fn name(&self) -> &str {
        "AlmostOrthogonal"
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
        self.factors.forward(graph, ambient, bases, |graph, s| {
            graph.shift(graph.scale(self.f.apply(graph, s), self.lam), 1.0)
        })
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        let (low, high) = (1.0 - self.lam - eps, 1.0 + self.lam + eps);
        point.shape() == self.factors.size.dims()
            && point.matrices().iter().all(|m| {
                m.singular_values()
                    .iter()
                    .all(|&s| (low..=high).contains(&s))
            })
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let rank = self.factors.rank;
        match init {
            SampleInit::Custom(sampler) => self.sample_custom(sampler, rng),
            // s = 0 puts every singular value at 1 + λ f(0)
            _ => self
                .factors
                .sample(init, rng, |_| DMatrix::zeros(rank, 1)),
        }
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        let svds = self.factors.decompose(self, target)?;
        if !self.in_manifold(target, eps) {
            return Err(ManifoldError::infeasible_target(format!(
                "singular values of the target leave [{}, {}]",
                1.0 - self.lam,
                1.0 + self.lam
            )));
        }
        self.factors.from_svds(&svds, eps, |sigma| self.invert(sigma, eps))
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        self.factors.update_base(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoparam_core::numerical::orthogonality_error;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bound_validation() {
        let config = OrthogonalConfig::default();
        for lam in [-0.1, 1.5, f64::NAN] {
            let err = AlmostOrthogonal::new(&[3, 3], lam, BoundedMap::Sigmoid, config).unwrap_err();
            assert!(err.is_configuration());
        }
        assert!(AlmostOrthogonal::new(&[3, 3], 0.0, BoundedMap::Sigmoid, config).is_ok());
        assert!(AlmostOrthogonal::new(&[3, 3], 1.0, BoundedMap::Tanh, config).is_ok());
    }

    #[test]
    fn test_uniform_sample_is_orthogonal() {
        let mut rng = StdRng::seed_from_u64(3);
        for f in [BoundedMap::Sigmoid, BoundedMap::Tanh, BoundedMap::Sin] {
            let map = AlmostOrthogonal::new(&[4, 3], 0.5, f, OrthogonalConfig::default()).unwrap();
            let point = map.evaluate(&map.sample(&SampleInit::Uniform, &mut rng).unwrap()).unwrap();
            assert!(orthogonality_error(point.matrix()) < 1e-12);
        }
    }

    #[test]
    fn test_singular_values_stay_in_band() {
        let map =
            AlmostOrthogonal::new(&[3, 3], 0.3, BoundedMap::Sin, OrthogonalConfig::default()).unwrap();
        let s = Tensor::from_row_slice(3, 1, &[10.0, -4.0, 0.2]);
        let coords = Coordinates::new(
            vec![Tensor::from_element(&[3, 3], 0.4), s, Tensor::from_element(&[3, 3], -0.1)],
            map.initial_bases(),
        );
        let point = map.evaluate(&coords).unwrap();
        assert!(map.in_manifold(&point, 1e-12));
    }

    #[test]
    fn test_right_inverse_round_trip() {
        let map =
            AlmostOrthogonal::new(&[2, 2], 0.5, BoundedMap::Tanh, OrthogonalConfig::default()).unwrap();
        let target = Tensor::from_row_slice(2, 2, &[0.0, -1.2, 0.9, 0.0]);
        let coords = map.right_inverse(&target, 1e-9).unwrap();
        assert_relative_eq!(
            map.evaluate(&coords).unwrap().matrix(),
            target.matrix(),
            epsilon = 1e-10
        );
        let too_big = Tensor::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 1.0]);
        assert!(map.right_inverse(&too_big, 1e-9).unwrap_err().is_infeasible_target());
    }
}
