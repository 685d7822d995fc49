//! Scalar maps applied to singular values and eigenvalues.
//!
//! [`PositiveMap`] sends the real line into `[epsilon, ∞)` for a positive
//! `epsilon` and drives fixed-rank and PSD maps. [`BoundedMap`] sends it
//! into `[-1, 1]` and drives the almost-orthogonal map. Both are closed
//! enums with a single [`CustomMap`] escape hatch.

use crate::error::{ManifoldError, Result};
use crate::types::constants::SOFTPLUS_EPSILON;
use geoparam_autodiff::{Graph, NodeId};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Graph-building closure of a custom nonlinearity.
pub type GraphFn = Arc<dyn Fn(&Graph, NodeId) -> NodeId + Send + Sync>;

/// Scalar inverse of a custom nonlinearity. Returns `None` outside its range.
pub type InverseFn = Arc<dyn Fn(f64) -> Option<f64> + Send + Sync>;

/// A user-supplied entry-wise nonlinearity.
#[derive(Clone)]
pub struct CustomMap {
    name: String,
    forward: GraphFn,
    inverse: Option<InverseFn>,
}

impl CustomMap {
    /// Wraps a closure that records the map on a graph.
    pub fn new<F>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(&Graph, NodeId) -> NodeId + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            forward: Arc::new(forward),
            inverse: None,
        }
    }

    /// Adds a scalar inverse, needed to initialize to a target.
    pub fn with_inverse<F>(mut self, inverse: F) -> Self
    where
        F: Fn(f64) -> Option<f64> + Send + Sync + 'static,
    {
        self.inverse = Some(Arc::new(inverse));
        self
    }

    /// Name used in messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, graph: &Graph, x: NodeId) -> NodeId {
        (self.forward)(graph, x)
    }

    fn invert(&self, y: f64) -> Result<f64> {
        let inverse = self.inverse.as_ref().ok_or_else(|| {
            ManifoldError::infeasible_target(format!(
                "nonlinearity {:?} has no inverse",
                self.name
            ))
        })?;
        inverse(y).ok_or_else(|| {
            ManifoldError::infeasible_target(format!(
                "{y} is outside the range of nonlinearity {:?}",
                self.name
            ))
        })
    }
}

impl fmt::Debug for CustomMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMap")
            .field("name", &self.name)
            .field("invertible", &self.inverse.is_some())
            .finish()
    }
}

/// Maps into the positive reals.
#[derive(Debug, Clone)]
pub enum PositiveMap {
    /// `softplus(x) + epsilon`
    Softplus {
        /// Lower bound of the output
        epsilon: f64,
    },
    /// `x² + epsilon`
    Squared {
        /// Lower bound of the output
        epsilon: f64,
    },
    /// User-supplied map
    Custom(CustomMap),
}

impl Default for PositiveMap {
    fn default() -> Self {
        Self::Softplus {
            epsilon: SOFTPLUS_EPSILON,
        }
    }
}

impl PositiveMap {
    /// Records the map on `graph`.
    pub fn apply(&self, graph: &Graph, x: NodeId) -> NodeId {
        match self {
            Self::Softplus { epsilon } => graph.shift(graph.softplus(x), *epsilon),
            Self::Squared { epsilon } => graph.shift(graph.square(x), *epsilon),
            Self::Custom(custom) => custom.apply(graph, x),
        }
    }

    /// A preimage of `y`.
    pub fn inverse(&self, y: f64) -> Result<f64> {
        match self {
            Self::Softplus { epsilon } => {
                let z = y - epsilon;
                if z > 0.0 {
                    // softplus⁻¹(z) = ln(eᶻ - 1), written to avoid overflow
                    Ok(z + (-(-z).exp()).ln_1p())
                } else {
                    Err(out_of_range(y, "softplus", *epsilon))
                }
            }
            Self::Squared { epsilon } => {
                let z = y - epsilon;
                if z >= 0.0 {
                    Ok(z.sqrt())
                } else {
                    Err(out_of_range(y, "squared", *epsilon))
                }
            }
            Self::Custom(custom) => custom.invert(y),
        }
    }

    /// Checks that a built-in map stays strictly positive.
    ///
    /// # Errors
    /// Returns a configuration error when `epsilon` is not a finite positive
    /// number. Custom maps are accepted as they are.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Softplus { epsilon } | Self::Squared { epsilon } => {
                if epsilon.is_finite() && *epsilon > 0.0 {
                    Ok(())
                } else {
                    Err(ManifoldError::configuration(format!(
                        "{} epsilon must be finite and positive, got {epsilon}",
                        self.label()
                    )))
                }
            }
            Self::Custom(_) => Ok(()),
        }
    }

    fn label(&self) -> &str {
        match self {
            Self::Softplus { .. } => "softplus",
            Self::Squared { .. } => "squared",
            Self::Custom(custom) => custom.name(),
        }
    }

    /// Smallest value the map can produce.
    pub fn lower_bound(&self) -> f64 {
        match self {
            Self::Softplus { epsilon } | Self::Squared { epsilon } => *epsilon,
            Self::Custom(_) => 0.0,
        }
    }
}

fn out_of_range(y: f64, name: &str, epsilon: f64) -> ManifoldError {
    ManifoldError::infeasible_target(format!(
        "{y} is below the lower bound {epsilon} of {name}"
    ))
}

impl FromStr for PositiveMap {
    type Err = ManifoldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "softplus" => Ok(Self::default()),
            "squared" => Ok(Self::Squared {
                epsilon: SOFTPLUS_EPSILON,
            }),
            other => Err(ManifoldError::configuration(format!(
                "unknown positive map {other:?}, expected one of [\"softplus\", \"squared\"]"
            ))),
        }
    }
}

/// Maps into `[-1, 1]`.
#[derive(Debug, Clone, Default)]
pub enum BoundedMap {
    /// `2σ(x) - 1`
    #[default]
    Sigmoid,
    /// `tanh(x)`
    Tanh,
    /// `sin(x)`
    Sin,
    /// User-supplied map
    Custom(CustomMap),
}

impl BoundedMap {
    /// Records the map on `graph`.
    pub fn apply(&self, graph: &Graph, x: NodeId) -> NodeId {
        match self {
            Self::Sigmoid => graph.shift(graph.scale(graph.sigmoid(x), 2.0), -1.0),
            Self::Tanh => graph.tanh(x),
            Self::Sin => graph.sin(x),
            Self::Custom(custom) => custom.apply(graph, x),
        }
    }

    /// A preimage of `y`.
    pub fn inverse(&self, y: f64) -> Result<f64> {
        let open_interval = |name: &str| -> Result<()> {
            if y.abs() < 1.0 {
                Ok(())
            } else {
                Err(ManifoldError::infeasible_target(format!(
                    "{y} is outside the open range (-1, 1) of {name}"
                )))
            }
        };
        match self {
            // 2σ(x) - 1 = tanh(x / 2)
            Self::Sigmoid => open_interval("sigmoid").map(|()| 2.0 * y.atanh()),
            Self::Tanh => open_interval("tanh").map(|()| y.atanh()),
            Self::Sin => {
                if y.abs() <= 1.0 {
                    Ok(y.asin())
                } else {
                    Err(ManifoldError::infeasible_target(format!(
                        "{y} is outside the range [-1, 1] of sin"
                    )))
                }
            }
            Self::Custom(custom) => custom.invert(y),
        }
    }
}

impl FromStr for BoundedMap {
    type Err = ManifoldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "sin" => Ok(Self::Sin),
            other => Err(ManifoldError::configuration(format!(
                "unknown bounded map {other:?}, expected one of [\"sigmoid\", \"tanh\", \"sin\"]"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoparam_autodiff::Tensor;

    fn eval(f: impl Fn(&Graph, NodeId) -> NodeId, x: f64) -> f64 {
        let graph = Graph::no_grad();
        let node = graph.variable(Tensor::scalar(x));
        graph.get_value(f(&graph, node)).unwrap().to_scalar()
    }

    #[test]
    fn test_positive_maps_round_trip() {
        for map in [
            PositiveMap::default(),
            PositiveMap::Squared { epsilon: 0.5 },
            "squared".parse().unwrap(),
        ] {
            for y in [0.7, 1.0, 3.5, 40.0] {
                let x = map.inverse(y).unwrap();
                assert_relative_eq!(eval(|g, n| map.apply(g, n), x), y, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_positive_map_rejects_values_below_bound() {
        let err = PositiveMap::Squared { epsilon: 1.0 }.inverse(0.5).unwrap_err();
        assert!(err.is_infeasible_target());
        assert!(PositiveMap::default().inverse(0.0).is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_epsilon() {
        assert!(PositiveMap::default().validate().is_ok());
        assert!("squared".parse::<PositiveMap>().unwrap().validate().is_ok());
        for map in [
            PositiveMap::Squared { epsilon: 0.0 },
            PositiveMap::Softplus { epsilon: -1.0 },
            PositiveMap::Softplus { epsilon: f64::NAN },
            PositiveMap::Squared {
                epsilon: f64::INFINITY,
            },
        ] {
            assert!(map.validate().unwrap_err().is_configuration(), "{map:?}");
        }
        let identity = PositiveMap::Custom(CustomMap::new("identity", |_, x| x));
        assert!(identity.validate().is_ok());
    }

    #[test]
    fn test_bounded_maps_round_trip() {
        for map in [BoundedMap::Sigmoid, BoundedMap::Tanh, BoundedMap::Sin] {
            for y in [-0.9, -0.2, 0.0, 0.5, 0.95] {
                let x = map.inverse(y).unwrap();
                assert_relative_eq!(eval(|g, n| map.apply(g, n), x), y, epsilon = 1e-9);
            }
        }
        assert!(BoundedMap::Tanh.inverse(1.0).is_err());
        assert!(BoundedMap::Sin.inverse(1.0).is_ok());
    }

    #[test]
    fn test_unknown_names_are_configuration_errors() {
        assert!("relu".parse::<PositiveMap>().unwrap_err().is_configuration());
        assert!("cos".parse::<BoundedMap>().unwrap_err().is_configuration());
        assert!(matches!("sin".parse::<BoundedMap>(), Ok(BoundedMap::Sin)));
    }

    #[test]
    fn test_custom_map_without_inverse() {
        let cube = CustomMap::new("cube", |g, x| g.mul(x, g.square(x)));
        let map = PositiveMap::Custom(cube.clone());
        assert_relative_eq!(eval(|g, n| map.apply(g, n), 2.0), 8.0);
        assert!(map.inverse(8.0).unwrap_err().is_infeasible_target());

        let map = PositiveMap::Custom(cube.with_inverse(|y| Some(y.cbrt())));
        assert_relative_eq!(map.inverse(8.0).unwrap(), 2.0);
    }
}
