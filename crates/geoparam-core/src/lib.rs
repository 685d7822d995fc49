//! Core traits and types for manifold parametrizations.
//!
//! This crate defines the contract shared by every constrained
//! parametrization: a [`ManifoldMap`] sends unconstrained ambient tensors
//! (and optional base points) to a point on a matrix manifold, records the
//! computation on an autodiff graph, and knows how to sample itself and how
//! to invert itself on a target point.
//!
//! # Modules
//!
//! - [`config`]: Trivialization and base-point configuration
//! - [`error`]: Error types for manifold maps
//! - [`manifold`]: Core manifold map trait and coordinates
//! - [`nonlinearity`]: Positive and bounded scalar maps
//! - [`numerical`]: Decompositions and constraint checks
//! - [`types`]: Sizes and numerical constants

pub mod config;
pub mod error;
pub mod manifold;
pub mod nonlinearity;
pub mod numerical;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{BaseMode, OrthogonalConfig, SphereConfig, Trivialization};
pub use error::{ManifoldError, Result};
pub use manifold::{Coordinates, ManifoldMap, SampleInit, Sampler};
pub use nonlinearity::{BoundedMap, CustomMap, PositiveMap};
pub use types::{constants, Size};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use geoparam_core::prelude::*;
///
/// let size = Size::matrix(4, 3).unwrap();
/// assert!(size.require_rank(3).is_ok());
/// ```
pub mod prelude {
    pub use crate::config::{BaseMode, OrthogonalConfig, SphereConfig, Trivialization};
    pub use crate::error::{ManifoldError, Result};
    pub use crate::manifold::{Coordinates, ManifoldMap, SampleInit};
    pub use crate::nonlinearity::{BoundedMap, CustomMap, PositiveMap};
    pub use crate::types::{constants, Size};
}
