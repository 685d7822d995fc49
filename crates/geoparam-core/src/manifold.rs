//! The manifold map trait and the coordinates it consumes.
//!
//! A manifold map turns unconstrained *ambient* tensors, plus optional
//! *base points*, into a point of a constrained matrix manifold:
//!
//! ```text
//!     forward : (ambient₁, …, ambientₖ ; base₁, …, baseⱼ) ↦ point ∈ ℳ
//! ```
//!
//! The map is recorded on an autodiff [`Graph`], so gradients of any loss
//! on the point flow back into the ambient tensors. Base points are buffers
//! and never receive gradients.
//!
//! # Invariants
//!
//! For every ambient input of the declared shapes the output satisfies the
//! manifold constraint up to floating-point error, with or without gradient
//! tracking. `right_inverse(p)` followed by `forward` reproduces `p` for any
//! `p` on the manifold, and `update_base` never changes the produced point.

use crate::config::BaseMode;
use crate::error::{ManifoldError, Result};
use crate::types::Size;
use geoparam_autodiff::{Graph, NodeId, Tensor};
use rand::RngCore;
use std::fmt;
use std::sync::Arc;

/// A user-supplied sampler: returns a tensor of the requested shape.
pub type Sampler = Arc<dyn Fn(&[usize], &mut dyn RngCore) -> Tensor + Send + Sync>;

/// How to draw a random point.
#[derive(Clone, Default)]
pub enum SampleInit {
    /// As close to the uniform (Haar) distribution as tractable.
    #[default]
    Uniform,
    /// Block-diagonal rotations with uniform angles.
    Torus,
    /// Ambient tensors drawn by a user sampler; bases keep their defaults.
    Custom(Sampler),
}

impl SampleInit {
    /// Wraps a sampling closure.
    pub fn custom<F>(sampler: F) -> Self
    where
        F: Fn(&[usize], &mut dyn RngCore) -> Tensor + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(sampler))
    }
}

impl fmt::Debug for SampleInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => f.write_str("Uniform"),
            Self::Torus => f.write_str("Torus"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Full state a map evaluates: ambient tensors and base points, in the
/// order declared by [`ManifoldMap::ambient_shapes`] and
/// [`ManifoldMap::base_shapes`].
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    /// Trainable tensors
    pub ambient: Vec<Tensor>,
    /// Reference points (buffers)
    pub bases: Vec<Tensor>,
}

impl Coordinates {
    /// Bundles ambient tensors and bases.
    pub fn new(ambient: Vec<Tensor>, bases: Vec<Tensor>) -> Self {
        Self { ambient, bases }
    }

    /// Coordinates of a map without base points.
    pub fn ambient_only(ambient: Vec<Tensor>) -> Self {
        Self::new(ambient, Vec::new())
    }

    /// Checks the tensor shapes against what `map` declares.
    pub fn check_shapes(&self, map: &dyn ManifoldMap) -> Result<()> {
        check_list("ambient", &self.ambient, &map.ambient_shapes())?;
        check_list("base", &self.bases, &map.base_shapes())
    }

    /// Appends `other`'s tensors after this one's.
    pub fn extend(&mut self, other: Self) {
        self.ambient.extend(other.ambient);
        self.bases.extend(other.bases);
    }
}

fn check_list(kind: &str, tensors: &[Tensor], shapes: &[Vec<usize>]) -> Result<()> {
    if tensors.len() != shapes.len() {
        return Err(ManifoldError::dimension_mismatch(
            format!("{} {kind} tensors", shapes.len()),
            format!("{} {kind} tensors", tensors.len()),
        ));
    }
    for (tensor, shape) in tensors.iter().zip(shapes) {
        if &tensor.shape() != shape {
            return Err(ManifoldError::dimension_mismatch(shape, tensor.shape()));
        }
    }
    Ok(())
}

/// A differentiable map from ambient coordinates onto a matrix manifold.
///
/// Maps are immutable configuration and are shared as
/// `Arc<dyn ManifoldMap>` by every binding that uses them.
pub trait ManifoldMap: fmt::Debug + Send + Sync {
    /// Short human-readable name.
    fn name(&self) -> &str;

    /// Shape of the produced points.
    fn size(&self) -> &Size;

    /// Shapes of the ambient tensors, in `forward` order.
    fn ambient_shapes(&self) -> Vec<Vec<usize>>;

    /// Shapes of the base points. Empty for maps with a global chart.
    fn base_shapes(&self) -> Vec<Vec<usize>> {
        Vec::new()
    }

    /// Base points used until an initialization replaces them.
    fn initial_bases(&self) -> Vec<Tensor> {
        Vec::new()
    }

    /// Whether `update_base` moves the bases.
    fn base_mode(&self) -> BaseMode {
        BaseMode::Fixed
    }

    /// Records the map on `graph`.
    ///
    /// `ambient` and `bases` must hold values of the declared shapes.
    fn forward(&self, graph: &Graph, ambient: &[NodeId], bases: &[NodeId]) -> NodeId;

    /// Whether `point` lies on the manifold within `eps`.
    fn in_manifold(&self, point: &Tensor, eps: f64) -> bool;

    /// Draws coordinates of a random point.
    fn sample(&self, init: &SampleInit, rng: &mut dyn RngCore) -> Result<Coordinates>;

    /// Coordinates whose `forward` equals `target`.
    ///
    /// Fails with [`ManifoldError::InfeasibleTarget`] when
    /// `!in_manifold(target, eps)`.
    fn right_inverse(&self, target: &Tensor, eps: f64) -> Result<Coordinates>;

    /// Dynamic trivialization step: moves the bases to the current point and
    /// resets the ambient tensors so the point is unchanged.
    fn update_base(&self, _coords: &mut Coordinates) -> Result<()> {
        Ok(())
    }

    /// Draws ambient tensors with a user sampler and keeps the default bases.
    fn sample_custom(&self, sampler: &Sampler, rng: &mut dyn RngCore) -> Result<Coordinates> {
        let ambient = self
            .ambient_shapes()
            .iter()
            .map(|shape| {
                let tensor = sampler(shape, rng);
                if &tensor.shape() == shape {
                    Ok(tensor)
                } else {
                    Err(ManifoldError::dimension_mismatch(shape, tensor.shape()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Coordinates::new(ambient, self.initial_bases()))
    }

    /// Evaluates the map outside of any training graph.
    fn evaluate(&self, coords: &Coordinates) -> Result<Tensor> {
        let graph = Graph::no_grad();
        let ambient: Vec<NodeId> = coords
            .ambient
            .iter()
            .map(|t| graph.constant(t.clone()))
            .collect();
        let bases: Vec<NodeId> = coords
            .bases
            .iter()
            .map(|t| graph.constant(t.clone()))
            .collect();
        let out = self.forward(&graph, &ambient, &bases);
        graph
            .get_value(out)
            .ok_or_else(|| ManifoldError::numerical_error("forward returned a foreign node"))
    }

    /// Fails unless `point` has this map's size.
    fn check_point(&self, point: &Tensor) -> Result<()> {
        if point.shape() == self.size().dims() {
            Ok(())
        } else {
            Err(ManifoldError::dimension_mismatch(self.size().dims(), point.shape()))
        }
    }
}
