//! # geoparam
//!
//! Differentiable manifold constraints for trainable matrices.
//!
//! Attach a constraint to a tensor attribute of a module and every read of
//! that attribute produces a point on the manifold, recorded on an autodiff
//! graph. Plain gradient descent on the underlying ambient tensors then
//! never leaves the manifold.
//!
//! ## Quick Start
//!
//! ```
//! use geoparam::prelude::*;
//!
//! let mut layer = Linear::new(4, 4, true);
//! attach::orthogonal(&mut layer, "weight", OrthogonalConfig::default()).unwrap();
//!
//! let graph = Graph::new();
//! let x = graph.constant(Tensor::from_element(&[2, 4], 1.0));
//! let y = layer.forward(&graph, x).unwrap();
//! let loss = graph.sum(graph.square(y));
//! let grads = backward(&graph, loss, None);
//! Sgd::new(0.1).step(&graph, &grads, layer.module_mut().parameters_mut());
//!
//! let q = layer.module().value("weight").unwrap();
//! let manifold = layer.module().parametrization("weight").unwrap().manifold();
//! assert!(manifold.in_manifold(&q, 1e-6));
//! ```
//!
//! ## Crates
//!
//! - [`geoparam_autodiff`]: tensors, the graph and the optimizer step
//! - [`geoparam_core`]: the [`ManifoldMap`] trait, configuration and errors
//! - [`geoparam_manifolds`]: the concrete manifolds
//!
//! This crate adds the host [`Module`], the [`Parametrization`] binding, the
//! scoped cache and the [`attach`] entry points.

pub mod attach;
pub mod cache;
pub mod error;
pub mod module;
pub mod nn;
pub mod parametrize;

pub use cache::{cached, with_cache, CacheScope, ScopedCache};
pub use error::{ParametrizeError, Result};
pub use module::{Attribute, Host, Module, ModuleId};
pub use nn::Linear;
pub use parametrize::{Init, Parametrization};

pub use geoparam_autodiff;
pub use geoparam_core;
pub use geoparam_manifolds;
pub use geoparam_core::{ManifoldError, ManifoldMap};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::attach;
    pub use crate::cache::{cached, with_cache};
    pub use crate::error::ParametrizeError;
    pub use crate::module::{Host, Module};
    pub use crate::nn::Linear;
    pub use crate::parametrize::{Init, Parametrization};

    pub use geoparam_autodiff::prelude::*;
    pub use geoparam_core::prelude::*;
    pub use geoparam_manifolds::{
        AlmostOrthogonal, FixedRank, Grassmannian, LowRank, PositiveSemidefinite, Product, Skew,
        Sphere, SphereEmbedded, Stiefel, Symmetric,
    };
}
