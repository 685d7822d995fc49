//! Spheres of radius `r`, one per row: S^{n-1}_r = {x in R^n : ‖x‖ = r}
//!
//! A `rows x n` size holds `rows` independent points, so a single vector is
//! a `1 x n` matrix.
//!
//! Two maps are provided:
//!
//! - [`Sphere`]: the exponential chart at a base point `b`. The ambient row
//!   is projected onto the tangent space `v = x - ⟨x, b⟩ b` and mapped to
//!   `r (cos‖v‖ b + sinc‖v‖ v)`. Smooth everywhere, including `v = 0`.
//! - [`SphereEmbedded`]: the projection `r x / ‖x‖`, which needs no base
//!   point but is singular at the origin.

use crate::utils::{all_matrices, gaussian, sample_batch};
use geoparam_autodiff::{Graph, NodeId, Tensor};
use geoparam_core::{
    constants::MIN_NORM, BaseMode, Coordinates, ManifoldError, ManifoldMap, Result, SampleInit,
    Size, SphereConfig,
};
use nalgebra::DMatrix;
use rand::RngCore;
use tracing::debug;

fn rows_on_sphere(point: &Tensor, radius: f64, eps: f64) -> bool {
    all_matrices(point, |m| {
        m.row_iter().all(|row| (row.norm() - radius).abs() <= eps)
    })
}

fn max_radius_error(point: &Tensor, radius: f64) -> f64 {
    point
        .matrices()
        .iter()
        .flat_map(|m| m.row_iter().map(|row| (row.norm() - radius).abs()).collect::<Vec<_>>())
        .fold(0.0, f64::max)
}

/// Rescales every row to unit norm. Rows below [`MIN_NORM`] become `e₁`.
fn unit_rows(m: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for mut row in out.row_iter_mut() {
        let norm = row.norm();
        if norm < MIN_NORM {
            row.fill(0.0);
            row[0] = 1.0;
        } else {
            row /= norm;
        }
    }
    out
}

fn infeasible(name: &str, point: &Tensor, radius: f64, eps: f64) -> ManifoldError {
    ManifoldError::infeasible_target(format!(
        "{name} target rows are {:e} away from radius {radius}, above {eps:e}",
        max_radius_error(point, radius)
    ))
}

/// Exponential chart of the sphere at a base point.
#[derive(Debug, Clone)]
pub struct Sphere {
    size: Size,
    radius: f64,
    base_mode: BaseMode,
}

impl Sphere {
    /// Creates the chart for points stored as the rows of `dims`.
    ///
    /// `config.embedded` is ignored; see [`SphereEmbedded`].
    pub fn new(dims: &[usize], config: SphereConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            size: Size::new(dims)?,
            radius: config.radius,
            base_mode: config.base_mode,
        })
    }

    /// Radius of the sphere.
    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl ManifoldMap for Sphere {
    fn name(&self) -> &str {
        "Sphere"
    }

    fn size(&self) -> &Size {
        &self.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.size.dims().to_vec()]
    }

    fn base_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.size.dims().to_vec()]
    }

    fn initial_bases(&self) -> Vec<Tensor> {
        let (rows, cols) = (self.size.rows(), self.size.cols());
        vec![Tensor::from_fn(self.size.dims(), |_| {
            DMatrix::from_fn(rows, cols, |_, j| if j == 0 { 1.0 } else { 0.0 })
        })]
    }

    fn base_mode(&self) -> BaseMode {
        self.base_mode
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId]) -> NodeId {
        graph.sphere_exp(ambient[0], bases[0], self.radius)
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.size.dims() && rows_on_sphere(point, self.radius, eps)
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let (rows, cols) = (self.size.rows(), self.size.cols());
        match init {
            SampleInit::Uniform => {
                // normalized Gaussian rows are uniform on the sphere
                let base = sample_batch(self.size.dims(), rng, |rng| {
                    unit_rows(&gaussian(rows, cols, rng))
                });
                Ok(Coordinates::new(
                    vec![Tensor::zeros(self.size.dims())],
                    vec![base],
                ))
            }
            SampleInit::Torus => Err(ManifoldError::configuration(
                "torus sampling is only defined for orthogonal and skew maps, not Sphere",
            )),
            SampleInit::Custom(sampler) => self.sample_custom(sampler, rng),
        }
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.check_point(target)?;
        if !self.in_manifold(target, eps) {
            return Err(infeasible(self.name(), target, self.radius, eps));
        }
        Ok(Coordinates::new(
            vec![Tensor::zeros(self.size.dims())],
            vec![target.map(unit_rows)],
        ))
    }

    fn update_base(&self, coords: &mut Coordinates) -> Result<()> {
        if self.base_mode == BaseMode::Fixed {
            return Ok(());
        }
        coords.check_shapes(self)?;
        let point = self.evaluate(coords)?;
        debug!(radius = self.radius, "moving sphere base to the current point");
        coords.bases[0] = point.map(unit_rows);
        coords.ambient[0] = Tensor::zeros(self.size.dims());
        Ok(())
    }
}

/// Sphere by projection: `r x / ‖x‖` row by row.
#[derive(Debug, Clone)]
pub struct SphereEmbedded {
    size: Size,
    radius: f64,
}

impl SphereEmbedded {
    /// Creates the projection for points stored as the rows of `dims`.
    pub fn new(dims: &[usize], radius: f64) -> Result<Self> {
        SphereConfig::default().with_radius(radius).validate()?;
        Ok(Self {
            size: Size::new(dims)?,
            radius,
        })
    }
}

impl ManifoldMap for SphereEmbedded {
    fn name(&self) -> &str {
        "SphereEmbedded"
    }

    fn size(&self) -> &Size {
        &self.size
    }

    fn ambient_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.size.dims().to_vec()]
    }

    fn forward(&self, graph: &Graph, ambient: &[NodeId], _bases: &[NodeId]) -> NodeId {
        graph.row_normalize(ambient[0], self.radius)
    }

    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool {
        point.shape() == self.size.dims() && rows_on_sphere(point, self.radius, eps)
    }

    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let (rows, cols) = (self.size.rows(), self.size.cols());
        match init {
            SampleInit::Uniform => Ok(Coordinates::ambient_only(vec![sample_batch(
                self.size.dims(),
                rng,
                |rng| gaussian(rows, cols, rng),
            )])),
            SampleInit::Torus => Err(ManifoldError::configuration(
                "torus sampling is only defined for orthogonal and skew maps, not SphereEmbedded",
            )),
            SampleInit::Custom(sampler) => self.sample_custom(sampler, rng),
        }
    }

    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates> {
        self.check_point(target)?;
        if !self.in_manifold(target, eps) {
            return Err(infeasible(self.name(), target, self.radius, eps));
        }
        Ok(Coordinates::ambient_only(vec![target.clone()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_invalid_radius() {
        let config = SphereConfig::default().with_radius(-1.0);
        assert!(Sphere::new(&[1, 3], config).unwrap_err().is_configuration());
        assert!(SphereEmbedded::new(&[1, 3], 0.0).is_err());
        assert!(Sphere::new(&[3], SphereConfig::default()).is_err());
    }

    #[test]
    fn test_zero_ambient_gives_base() {
        let map = Sphere::new(&[2, 3], SphereConfig::default().with_radius(2.0)).unwrap();
        let coords = Coordinates::new(vec![Tensor::zeros(&[2, 3])], map.initial_bases());
        let point = map.evaluate(&coords).unwrap();
        assert_eq!(point, Tensor::from_row_slice(2, 3, &[2.0, 0.0, 0.0, 2.0, 0.0, 0.0]));
    }

    #[test]
    fn test_samples_on_sphere() {
        let mut rng = StdRng::seed_from_u64(8);
        let chart = Sphere::new(&[3, 2, 4], SphereConfig::default().with_radius(0.5)).unwrap();
        let projection = SphereEmbedded::new(&[3, 2, 4], 0.5).unwrap();
        let custom = SampleInit::custom(|shape, _| Tensor::from_element(shape, 0.3));
        for map in [&chart as &dyn ManifoldMap, &projection] {
            for init in [SampleInit::Uniform, custom.clone()] {
                let coords = map.sample(&init, &mut rng).unwrap();
                assert!(map.in_manifold(&map.evaluate(&coords).unwrap(), 1e-12));
            }
            assert!(map.sample(&SampleInit::Torus, &mut rng).is_err());
        }
    }

    #[test]
    fn test_right_inverse_round_trip() {
        let target = Tensor::from_row_slice(1, 3, &[0.0, 0.6, 0.8]);
        let chart = Sphere::new(&[1, 3], SphereConfig::default()).unwrap();
        let coords = chart.right_inverse(&target, 1e-12).unwrap();
        assert_relative_eq!(
            chart.evaluate(&coords).unwrap().matrix(),
            target.matrix(),
            epsilon = 1e-15
        );
        let projection = SphereEmbedded::new(&[1, 3], 1.0).unwrap();
        let coords = projection.right_inverse(&target, 1e-12).unwrap();
        assert_relative_eq!(
            projection.evaluate(&coords).unwrap().matrix(),
            target.matrix(),
            epsilon = 1e-15
        );
        let off = Tensor::from_row_slice(1, 3, &[1.0, 1.0, 0.0]);
        assert!(chart.right_inverse(&off, 1e-6).unwrap_err().is_infeasible_target());
    }

    #[test]
    fn test_dynamic_update_keeps_point() {
        let map = Sphere::new(
            &[2, 3],
            SphereConfig::default().with_base_mode(BaseMode::Dynamic),
        )
        .unwrap();
        let x = Tensor::from_row_slice(2, 3, &[0.1, 0.9, -0.4, 2.0, 0.0, 1.0]);
        let mut coords = Coordinates::new(vec![x], map.initial_bases());
        let before = map.evaluate(&coords).unwrap();
        map.update_base(&mut coords).unwrap();
        assert_eq!(coords.ambient[0], Tensor::zeros(&[2, 3]));
        assert_relative_eq!(
            map.evaluate(&coords).unwrap().matrix(),
            before.matrix(),
            epsilon = 1e-12
        );
    }
}
