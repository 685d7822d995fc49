//! Automatic differentiation substrate for manifold parametrizations.
//!
//! This crate provides a small eager reverse-mode autodiff engine over
//! batches of `f64` matrices. It carries exactly what constrained
//! parametrizations need: elementwise and shape operations, a matrix
//! exponential whose backward pass is the Fréchet derivative, the Cayley
//! transform, sphere maps, a no-grad mode and a plain SGD step.
//!
//! # Architecture
//!
//! 1. **Tensor**: a batch of equally shaped matrices
//! 2. **Graph**: records operations and binds [`Parameter`]s to leaves
//! 3. **Operations**: forward and backward rules behind the [`Op`] trait
//! 4. **Backward**: reverse accumulation into a [`GradientMap`]
//!
//! ```
//! use geoparam_autodiff::prelude::*;
//!
//! let w = Parameter::new(Tensor::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]));
//! let graph = Graph::new();
//! let x = graph.parameter(&w);
//! let q = graph.expm(x);
//! let loss = graph.sum(q);
//! let grads = backward(&graph, loss, None);
//! assert!(graph.grad_of(&grads, &w).is_some());
//! ```

pub mod backward;
pub mod broadcast;
pub mod functional;
pub mod graph;
pub mod linalg;
pub mod manifold_ops;
pub mod ops;
pub mod optim;
pub mod tensor;

pub use backward::{backward, check_gradients, grad, GradientMap};
pub use broadcast::{broadcast_shape, unbroadcast, BroadcastAdd, BroadcastError};
pub use graph::{Graph, GraphId, NoGradGuard, Node, NodeId, ParamId, Parameter};
pub use linalg::{frechet_exp, CayleyTransform, MatrixExp};
pub use manifold_ops::{RowNormalize, SphereExp};
pub use ops::{Block, Op};
pub use optim::{MomentumMethod, Sgd};
pub use tensor::{Tensor, TensorError};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backward::{backward, GradientMap};
    pub use crate::graph::{Graph, NodeId, Parameter};
    pub use crate::ops::{Block, Op};
    pub use crate::optim::Sgd;
    pub use crate::tensor::Tensor;
}
