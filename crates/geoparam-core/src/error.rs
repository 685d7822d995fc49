//! Error types for manifold maps.
//!
//! Configuration problems surface when a map is built; infeasible targets
//! surface when a map is initialized to a given point. Near-singular numerics
//! during training are logged, not raised.

use thiserror::Error;

/// Errors that can occur while building or initializing a manifold map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifoldError {
    /// Invalid static configuration.
    ///
    /// Raised at construction time for sizes with fewer than two dimensions
    /// or a zero dimension, rectangular sizes on square-only manifolds,
    /// ranks outside `[1, min(rows, cols)]`, out-of-range bounds and
    /// unknown nonlinearity names.
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// Description of the configuration error
        reason: String,
    },

    /// Initialization target does not lie on the manifold.
    #[error("Target is not on the manifold: {reason}")]
    InfeasibleTarget {
        /// Description of why the target is infeasible
        reason: String,
    },

    /// Dimension mismatch between tensors.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions
        expected: String,
        /// Actual dimensions
        actual: String,
    },

    /// A decomposition failed to converge or produced non-finite values.
    #[error("Numerical failure: {reason}")]
    NumericalError {
        /// Description of the numerical issue
        reason: String,
    },
}

impl ManifoldError {
    /// Create a Configuration error with a custom reason.
    pub fn configuration<S: Into<String>>(reason: S) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an InfeasibleTarget error with a custom reason.
    pub fn infeasible_target<S: Into<String>>(reason: S) -> Self {
        Self::InfeasibleTarget {
            reason: reason.into(),
        }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch<S1, S2>(expected: S1, actual: S2) -> Self
    where
        S1: std::fmt::Debug,
        S2: std::fmt::Debug,
    {
        Self::DimensionMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    /// Create a NumericalError with a custom reason.
    pub fn numerical_error<S: Into<String>>(reason: S) -> Self {
        Self::NumericalError {
            reason: reason.into(),
        }
    }

    /// Whether this error reports bad static configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Whether this error reports an off-manifold initialization target.
    pub fn is_infeasible_target(&self) -> bool {
        matches!(self, Self::InfeasibleTarget { .. })
    }
}

/// Result type alias for manifold operations.
pub type Result<T> = std::result::Result<T, ManifoldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ManifoldError::configuration("rank 5 exceeds min(3, 4)");
        assert_eq!(err.to_string(), "Invalid configuration: rank 5 exceeds min(3, 4)");
        assert!(err.is_configuration());

        let err = ManifoldError::dimension_mismatch([3, 3], [3, 4]);
        assert_eq!(err.to_string(), "Dimension mismatch: expected [3, 3], got [3, 4]");
        assert!(!err.is_infeasible_target());
    }
}
