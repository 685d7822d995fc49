//! Plain stochastic gradient descent on parameters.
//!
//! Parametrized tensors stay on their manifold through the parametrization
//! itself, so the optimizer works in the flat ambient space.

use crate::backward::GradientMap;
use crate::graph::{Graph, ParamId, Parameter};
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Momentum method for SGD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MomentumMethod {
    /// No momentum
    None,

    /// Classical momentum: `v_k = beta * v_{k-1} + grad_k`
    Classical {
        /// Decay coefficient `beta`
        coefficient: f64,
    },
}

/// SGD optimizer over [`Parameter`]s.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
    momentum: MomentumMethod,
    velocity: HashMap<ParamId, Tensor>,
}

impl Sgd {
    /// Creates an optimizer with the given step size and no momentum.
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: MomentumMethod::None,
            velocity: HashMap::new(),
        }
    }

    /// Enables classical momentum.
    pub fn with_momentum(mut self, coefficient: f64) -> Self {
        self.momentum = MomentumMethod::Classical { coefficient };
        self
    }

    /// Step size.
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Updates every parameter that received a gradient in `graph`.
    ///
    /// Returns the number of parameters updated.
    pub fn step<'p>(
        &mut self,
        graph: &Graph,
        grads: &GradientMap,
        params: impl IntoIterator<Item = &'p mut Parameter>,
    ) -> usize {
        let mut updated = 0;
        for param in params {
            if !param.requires_grad() {
                continue;
            }
            let Some(grad) = graph.grad_of(grads, param) else {
                continue;
            };
            let direction = match self.momentum {
                MomentumMethod::None => grad.clone(),
                MomentumMethod::Classical { coefficient } => {
                    let v = match self.velocity.remove(&param.id()) {
                        Some(v) => &v.scale(coefficient) + grad,
                        None => grad.clone(),
                    };
                    self.velocity.insert(param.id(), v.clone());
                    v
                }
            };
            let next = param.value() - &direction.scale(self.learning_rate);
            param.set_value(next);
            updated += 1;
        }
        updated
    }

    /// Forgets accumulated momentum.
    pub fn reset(&mut self) {
        self.velocity.clear();
    }
}
