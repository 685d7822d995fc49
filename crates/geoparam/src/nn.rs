//! Minimal layers that host parametrized tensors.

use crate::error::Result;
use crate::module::{Host, Module};
use geoparam_autodiff::{Graph, NodeId, Tensor};
use nalgebra::DMatrix;
use rand::Rng;
use std::collections::BTreeMap;

/// Affine map `y = x Wᵀ + b` with `W` of shape `out x in` and `b` of shape
/// `1 x out`.
#[derive(Debug)]
pub struct Linear {
    module: Module,
    in_features: usize,
    out_features: usize,
    bias: bool,
}

impl Linear {
    /// Weights drawn from `U(-1/√in, 1/√in)`, bias zero.
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Self {
        Self::with_rng(in_features, out_features, bias, &mut rand::thread_rng())
    }

    /// Same as [`Linear::new`] with an explicit generator.
    pub fn with_rng<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let bound = 1.0 / (in_features.max(1) as f64).sqrt();
        let weight = DMatrix::from_fn(out_features, in_features, |_, _| {
            rng.gen_range(-bound..=bound)
        });
        let mut parameters = BTreeMap::new();
        parameters.insert("weight".to_string(), Tensor::from_matrix(weight));
        if bias {
            parameters.insert("bias".to_string(), Tensor::zeros(&[1, out_features]));
        }
        Self {
            module: Module::from_parameters(parameters),
            in_features,
            out_features,
            bias,
        }
    }

    /// Input width.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output width.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Records `x Wᵀ + b` for a batch of rows `x`.
    pub fn forward(&self, graph: &Graph, x: NodeId) -> Result<NodeId> {
        let weight = self.module.get(graph, "weight")?;
        let y = graph.matmul(x, graph.transpose(weight));
        if self.bias {
            let bias = self.module.get(graph, "bias")?;
            Ok(graph.broadcast_add(y, bias))
        } else {
            Ok(y)
        }
    }
}

impl Host for Linear {
    fn module(&self) -> &Module {
        &self.module
    }

    fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }
}
