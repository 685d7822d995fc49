//! Matrices of rank exactly `r`.
//!
//! Same factorization as [`LowRank`](crate::LowRank), with the singular
//! values passed through a map into `(0, ∞)`. The default
//! `softplus(x) + 1e-6` keeps them away from zero, so the rank cannot
//! collapse.

use crate::low_rank::SvdFactors;
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    BaseMode, Coordinates, ManifoldMap, OrthogonalConfig, PositiveMap, Result, SampleInit, Size,
};
use rand::RngCore;

/// Matrices of rank exactly `rank`.
#[derive(Debug, Clone)]
pub struct FixedRank {
    factors: SvdFactors,
    f: PositiveMap,
}

impl FixedRank {
    /// Creates the map for matrices of shape `dims`.
    ///
    /// # Errors
    /// Returns a configuration error unless `1 <= rank <= min(rows, cols)`
    /// and `f` keeps the singular values strictly positive.
    pub fn new(
        dims: &[usize],
        rank: usize,
        f: PositiveMap,
        config: OrthogonalConfig,
    ) -> Result<Self> {
        f.validate()?;
        Ok(Self {
            factors: SvdFactors::new(dims, rank, config)?,
            f,
        })
    }

    /// The rank.
    pub fn rank(&self) -> usize {
        self.factors.rank
    }

    /// The map applied to the singular values.
    pub fn nonlinearity(&self) -> &PositiveMap {
        &self.f
    }
}

impl ManifoldMap for FixedRank {
    fn name(&self) -> &str {
        "FixedRank"
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
        self.factors
            .forward(graph, ambient, bases, |graph, s| self.f.apply(graph, s))
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        let rank = self.factors.rank;
        // singular values produced by `f` never drop below its floor
        let floor = self.f.lower_bound();
        let threshold = if floor > 0.0 { eps.min(0.5 * floor) } else { eps };
        point.shape() == self.factors.size.dims()
            && point.matrices().iter().all(|m| {
                let values = m.singular_values();
                values.iter().filter(|&&s| s > threshold).count() == rank
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
        self.factors.from_svds(&svds, eps, |sigma| self.f.inverse(sigma))
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        self.factors.update_base(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoparam_core::numerical::sorted_svd;
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_singular_values_past_rank_vanish() {
        let mut rng = StdRng::seed_from_u64(21);
        let map = FixedRank::new(&[6, 4], 2, PositiveMap::default(), OrthogonalConfig::default())
            .unwrap();
        for _ in 0..5 {
            let point = map.evaluate(&map.sample(&SampleInit::Uniform, &mut rng).unwrap()).unwrap();
            let svd = sorted_svd(point.matrix()).unwrap();
            assert!(svd.singular_values[1] >= 1e-6 - 1e-12);
            assert!(svd.singular_values[2] < 1e-12);
            assert!(map.in_manifold(&point, 1e-9));
        }
    }

    #[test]
    fn test_right_inverse_with_squared_map() {
        let map = FixedRank::new(
            &[3, 3],
            1,
            PositiveMap::Squared { epsilon: 0.5 },
            OrthogonalConfig::default(),
        )
        .unwrap();
        let a = DMatrix::from_row_slice(3, 1, &[1.0, -2.0, 2.0]);
        let target = Tensor::from_matrix(&a * a.transpose());
        let coords = map.right_inverse(&target, 1e-9).unwrap();
        // s² + 0.5 = 9
        assert_relative_eq!(coords.ambient[1].matrix()[(0, 0)], 8.5f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(
            map.evaluate(&coords).unwrap().matrix(),
            target.matrix(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_rank_deficient_target_is_infeasible() {
        let map = FixedRank::new(&[3, 3], 2, PositiveMap::default(), OrthogonalConfig::default())
            .unwrap();
        let a = DMatrix::from_row_slice(3, 1, &[1.0, 0.0, 0.0]);
        let target = Tensor::from_matrix(&a * a.transpose());
        assert!(map.right_inverse(&target, 1e-9).unwrap_err().is_infeasible_target());
    }

    /// Coordinates with identity frames and the given singular parameters.
    fn with_singular(map: &FixedRank, s: [f64; 2]) -> Coordinates {
        let mut ambient: Vec<Tensor> = map
            .ambient_shapes()
            .iter()
            .map(|dims| Tensor::zeros(dims))
            .collect();
        ambient[1] = Tensor::from_row_slice(2, 1, &s);
        Coordinates::new(ambient, map.initial_bases())
    }

    #[test]
    fn test_rank_holds_for_extreme_singular_parameters() {
        let maps = [
            PositiveMap::default(),
            "squared".parse().unwrap(),
            PositiveMap::Squared { epsilon: 1e-3 },
            PositiveMap::Softplus { epsilon: 0.25 },
        ];
        let extremes = [
            [0.0, 0.0],
            [-1e3, -1e3],
            [-40.0, 30.0],
            [1e-9, -1e-9],
            [-800.0, 0.0],
        ];
        for f in maps {
            let map = FixedRank::new(&[6, 4], 2, f, OrthogonalConfig::default()).unwrap();
            for s in extremes {
                let point = map.evaluate(&with_singular(&map, s)).unwrap();
                assert!(point.is_finite());
                assert!(
                    map.in_manifold(&point, 1e-6),
                    "{:?} collapsed the rank at s = {s:?}",
                    map.nonlinearity()
                );
                let svd = sorted_svd(point.matrix()).unwrap();
                assert!(svd.singular_values[1] >= map.nonlinearity().lower_bound() * (1.0 - 1e-9));
            }
        }
    }

    #[test]
    fn test_non_positive_epsilon_is_rejected() {
        for f in [
            PositiveMap::Squared { epsilon: 0.0 },
            PositiveMap::Softplus { epsilon: -1.0 },
            PositiveMap::Softplus { epsilon: f64::NAN },
        ] {
            let err = FixedRank::new(&[6, 4], 2, f, OrthogonalConfig::default()).unwrap_err();
            assert!(err.is_configuration());
        }
    }
}
