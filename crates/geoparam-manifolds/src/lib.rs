//! Manifold maps for constrained parametrizations.
//!
//! Every map implements [`ManifoldMap`](geoparam_core::ManifoldMap): it turns
//! unconstrained ambient tensors into points that satisfy the manifold
//! constraint exactly (or to machine precision), whatever the input.

pub mod almost_orthogonal;
pub mod fixed_rank;
pub mod grassmann;
pub mod low_rank;
pub mod product;
pub mod psd;
pub mod skew;
pub mod sphere;
pub mod stiefel;
pub mod symmetric;
pub mod utils;

// Re-export main manifolds for convenience
pub use almost_orthogonal::AlmostOrthogonal;
pub use fixed_rank::FixedRank;
pub use grassmann::Grassmannian;
pub use low_rank::LowRank;
pub use product::Product;
pub use psd::PositiveSemidefinite;
pub use skew::Skew;
pub use sphere::{Sphere, SphereEmbedded};
pub use stiefel::Stiefel;
pub use symmetric::Symmetric;
