//! Product of manifolds, laid out block-diagonally.
//!
//! For factors `ℳ₁, …, ℳₖ` of sizes `mᵢ x nᵢ` (sharing their batch dims)
//! the product produces the `Σmᵢ x Σnᵢ` matrix
//!
//! ```text
//!     diag(p₁, …, pₖ),   pᵢ ∈ ℳᵢ
//! ```
//!
//! Coordinates are the concatenation of the factors' coordinates, in
//! factor order.

use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{BaseMode, Coordinates, ManifoldError, ManifoldMap, Result, SampleInit, Size};
use nalgebra::DMatrix;
use rand::RngCore;
use std::sync::Arc;

/// Block-diagonal product of manifold maps.
#[derive(Debug, Clone)]
pub struct Product {
    size: Size,
    factors: Vec<Arc<dyn ManifoldMap>>,
    /// `(row, col)` offset of each block
    offsets: Vec<(usize, usize)>,
}

impl Product {
    /// Builds the product of `factors`.
    ///
    /// # Errors
    /// Returns a configuration error for an empty list or factors with
    /// different batch dims.
    pub fn new(factors: Vec<Arc<dyn ManifoldMap>>) -> Result<Self> {
        let first = factors
            .first()
            .ok_or_else(|| ManifoldError::configuration("a product needs at least one factor"))?;
        let batch = first.size().batch().to_vec();
        let mut offsets = Vec::with_capacity(factors.len());
        let (mut rows, mut cols) = (0, 0);
        for factor in &factors {
            if factor.size().batch() != batch.as_slice() {
                return Err(ManifoldError::configuration(format!(
                    "product factors must share batch dims, got {} and {}",
                    first.size(),
                    factor.size()
                )));
            }
            offsets.push((rows, cols));
            rows += factor.size().rows();
            cols += factor.size().cols();
        }
        let mut dims = batch;
        dims.extend([rows, cols]);
        Ok(Self {
            size: Size::new(&dims)?,
            factors,
            offsets,
        })
    }

    /// The factor maps.
    pub fn factors(&self) -> &[Arc<dyn ManifoldMap>] {
        &self.factors
    }

    fn block(&self, point: &Tensor, index: usize) -> Tensor {
        let (row, col) = self.offsets[index];
        let size = self.factors[index].size();
        let (rows, cols) = (size.rows(), size.cols());
        point.map(|m| m.view((row, col), (rows, cols)).into_owned())
    }

    /// Whether everything outside the diagonal blocks is below `eps`.
    fn off_blocks_vanish(&self, point: &Tensor, eps: f64) -> bool {
        let mut mask = DMatrix::from_element(self.size.rows(), self.size.cols(), 1.0);
        for (factor, &(row, col)) in self.factors.iter().zip(&self.offsets) {
            let size = factor.size();
            mask.view_mut((row, col), (size.rows(), size.cols())).fill(0.0);
        }
        point
            .matrices()
            .iter()
            .all(|m| m.component_mul(&mask).amax() <= eps)
    }

    /// Splits concatenated coordinates into per-factor coordinates.
    fn split(&self, coords: Coordinates) -> Result<Vec<Coordinates>> {
        coords.check_shapes(self)?;
        let mut ambient = coords.ambient.into_iter();
        let mut bases = coords.bases.into_iter();
        Ok(self
            .factors
            .iter()
            .map(|factor| {
                Coordinates::new(
                    ambient.by_ref().take(factor.ambient_shapes().len()).collect(),
                    bases.by_ref().take(factor.base_shapes().len()).collect(),
                )
            })
            .collect())
    }

    fn join(parts: Vec<Coordinates>) -> Coordinates {
        parts
            .into_iter()
            .fold(Coordinates::new(Vec::new(), Vec::new()), |mut acc, part| {
                acc.extend(part);
                acc
            })
    }
}

impl ManifoldMap for Product {
    fn name(&self) -> &str {
        "Product"
    }

    fn size(&self) -> &Size {
        &self.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        self.factors.iter().flat_map(|f| f.ambient_shapes()).collect()
    }

    fn base_shapes(&self) -> Vec<Vec<usize>> {
        self.factors.iter().flat_map(|f| f.base_shapes()).collect()
    }

    fn initial_bases(&self) -> Vec<Tensor> {
        self.factors.iter().flat_map(|f| f.initial_bases()).collect()
    }

    fn base_mode(&self) -> BaseMode {
        if self
            .factors
            .iter()
            .any(|f| f.base_mode() == BaseMode::Dynamic)
        {
            BaseMode::Dynamic
        } else {
            BaseMode::Fixed
        }
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId]) -> NodeId {
        let (mut a, mut b) = (0, 0);
        let blocks: Vec<NodeId> = self
            .factors
            .iter()
            .map(|factor| {
                let (na, nb) = (factor.ambient_shapes().len(), factor.base_shapes().len());
                let block = factor.forward(graph, &ambient[a..a + na], &bases[b..b + nb]);
                a += na;
                b += nb;
                block
            })
            .collect();
        graph.block_diag(&blocks)
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.size.dims()
            && self.off_blocks_vanish(point, eps)
            && self
                .factors
                .iter()
                .enumerate()
                .all(|(i, factor)| factor.in_manifold(&self.block(point, i), eps))
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let parts = self
            .factors
            .iter()
            .map(|factor| factor.sample(init, &mut *rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::join(parts))
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.check_point(target)?;
        if !self.off_blocks_vanish(target, eps) {
            return Err(ManifoldError::infeasible_target(
                "product target has non-zero entries off its diagonal blocks",
            ));
        }
        let parts = self
            .factors
            .iter()
            .enumerate()
            .map(|(i, factor)| factor.right_inverse(&self.block(target, i), eps))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::join(parts))
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        let mut parts = self.split(coords.clone())?;
        for (factor, part) in self.factors.iter().zip(parts.iter_mut()) {
            factor.update_base(part)?;
        }
        *coords = Self::join(parts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Skew, Sphere, Stiefel};
    use geoparam_core::{OrthogonalConfig, SphereConfig};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn product() -> Product {
        Product::new(vec![
            Arc::new(Stiefel::new(&[3, 2], OrthogonalConfig::default()).unwrap()) as Arc<dyn ManifoldMap>,
            Arc::new(Skew::new(&[2, 2], true).unwrap()),
            Arc::new(Sphere::new(&[1, 3], SphereConfig::default()).unwrap()),
        ])
        .unwrap()
    }

    #[test]
    fn test_layout() {
        let map = product();
        assert_eq!(map.size().dims(), &[6, 7]);
        assert_eq!(
            map.ambient_shapes(),
            vec![vec![3, 2], vec![2, 2], vec![1, 3]]
        );
        assert_eq!(map.base_shapes(), vec![vec![3, 3], vec![1, 3]]);
    }

    #[test]
    fn test_invalid_products() {
        assert!(Product::new(Vec::new()).unwrap_err().is_configuration());
        let err = Product::new(vec![
            Arc::new(Skew::new(&[2, 2, 2], true).unwrap()) as Arc<dyn ManifoldMap>,
            Arc::new(Skew::new(&[2, 2], true).unwrap()),
        ])
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_sample_and_round_trip() {
        let mut rng = StdRng::seed_from_u64(31);
        let map = product();
        let point = map
            .evaluate(&map.sample(&SampleInit::Uniform, &mut rng).unwrap())
            .unwrap();
        assert!(map.in_manifold(&point, 1e-9));

        let coords = map.right_inverse(&point, 1e-9).unwrap();
        let again = map.evaluate(&coords).unwrap();
        assert!((again.matrix() - point.matrix()).amax() < 1e-12);

        let mut corrupted = point.clone();
        corrupted.matrices_mut()[0][(0, 6)] = 1.0;
        assert!(!map.in_manifold(&corrupted, 1e-9));
        assert!(map.right_inverse(&corrupted, 1e-9).is_err());
    }

    #[test]
    fn test_torus_fails_when_a_factor_cannot_do_it() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(product().sample(&SampleInit::Torus, &mut rng).is_err());
    }
}
