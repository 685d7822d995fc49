//! One entry point per manifold family.
//!
//! Each function reads the shape of attribute `name` on `host`, builds the
//! matching map for that shape and registers it. Batched tensors (more than
//! two dims) are constrained matrix by matrix.
//!
//! ```
//! use geoparam::prelude::*;
//!
//! let mut linear = Linear::new(5, 3, false);
//! attach::fixed_rank(&mut linear, "weight", 2, PositiveMap::default(), OrthogonalConfig::default())
//!     .unwrap();
//! let w = linear.module().value("weight").unwrap();
//! assert_eq!(w.shape(), vec![3, 5]);
//! ```

use crate::error::Result;
use crate::module::Host;
use geoparam_core::{BoundedMap, ManifoldMap, OrthogonalConfig, PositiveMap, SphereConfig};
use geoparam_manifolds::{
    AlmostOrthogonal, FixedRank, Grassmannian, LowRank, PositiveSemidefinite, Product, Skew,
    Sphere, SphereEmbedded, Stiefel, Symmetric,
};
use std::sync::Arc;

fn register<H, M>(host: &mut H, name: &str, map: M) -> Result<()>
where
    H: Host + ?Sized,
    M: ManifoldMap + 'static,
{
    host.module_mut()
        .register_parametrization(name, Arc::new(map))
}

/// Orthogonal (square) or Stiefel (rectangular) matrices.
pub fn orthogonal<H: Host + ?Sized>(host: &mut H, name: &str, config: OrthogonalConfig) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, Stiefel::new(&shape, config)?)
}

/// Skew-symmetric matrices built from the lower (or upper) triangle.
pub fn skew<H: Host + ?Sized>(host: &mut H, name: &str, lower: bool) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, Skew::new(&shape, lower)?)
}

/// Symmetric matrices built from the lower (or upper) triangle.
pub fn symmetric<H: Host + ?Sized>(host: &mut H, name: &str, lower: bool) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, Symmetric::new(&shape, lower)?)
}

/// Orthonormal frames modulo rotations within the spanned subspace.
pub fn grassmannian<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    config: OrthogonalConfig,
) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, Grassmannian::new(&shape, config)?)
}

/// Rows of norm `config.radius`. `config.embedded` selects the projection
/// map instead of the exponential chart.
pub fn sphere<H: Host + ?Sized>(host: &mut H, name: &str, config: SphereConfig) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    if config.embedded {
        register(host, name, SphereEmbedded::new(&shape, config.radius)?)
    } else {
        register(host, name, Sphere::new(&shape, config)?)
    }
}

/// Matrices of rank at most `rank`.
pub fn low_rank<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    rank: usize,
    config: OrthogonalConfig,
) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, LowRank::new(&shape, rank, config)?)
}

/// Matrices of rank exactly `rank`.
pub fn fixed_rank<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    rank: usize,
    f: PositiveMap,
    config: OrthogonalConfig,
) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, FixedRank::new(&shape, rank, f, config)?)
}

/// Matrices with singular values in `[1 - lam, 1 + lam]`.
pub fn almost_orthogonal<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    lam: f64,
    f: BoundedMap,
    config: OrthogonalConfig,
) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, AlmostOrthogonal::new(&shape, lam, f, config)?)
}

/// Positive semidefinite matrices with `rank` positive eigenvalues
/// (`None` for positive definite).
pub fn positive_semidefinite<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    rank: Option<usize>,
    f: PositiveMap,
    config: OrthogonalConfig,
) -> Result<()> {
    let shape = host.module().shape_of(name)?;
    register(host, name, PositiveSemidefinite::new(&shape, rank, f, config)?)
}

/// Block-diagonal product of `factors`; the attribute must have the
/// product's shape.
pub fn product<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    factors: Vec<Arc<dyn ManifoldMap>>,
) -> Result<()> {
    register(host, name, Product::new(factors)?)
}
