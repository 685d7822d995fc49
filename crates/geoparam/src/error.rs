//! Errors raised while attaching, reading or initializing parametrizations.

use geoparam_core::ManifoldError;
use thiserror::Error;

/// Errors of the attachment and initialization layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParametrizeError {
    /// The module has no attribute with this name.
    #[error("Module has no attribute '{name}'")]
    UnknownAttribute {
        /// Attribute name
        name: String,
    },

    /// The attribute is already bound to a different manifold map.
    #[error("Attribute '{name}' is already parametrized by {manifold}")]
    AlreadyParametrized {
        /// Attribute name
        name: String,
        /// Name of the map already attached
        manifold: String,
    },

    /// The attribute is a plain tensor.
    #[error("Attribute '{name}' is not parametrized")]
    NotParametrized {
        /// Attribute name
        name: String,
    },

    /// The tensor shape does not match what the map produces or consumes.
    #[error("Shape mismatch on '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Attribute name
        name: String,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// An attribute or child module with this name already exists.
    #[error("Module already has an attribute or child named '{name}'")]
    DuplicateAttribute {
        /// Attribute name
        name: String,
    },

    /// Building, sampling or inverting a manifold map failed.
    #[error(transparent)]
    Manifold(#[from] ManifoldError),
}

impl ParametrizeError {
    pub(crate) fn unknown(name: &str) -> Self {
        Self::UnknownAttribute {
            name: name.to_string(),
        }
    }

    pub(crate) fn not_parametrized(name: &str) -> Self {
        Self::NotParametrized {
            name: name.to_string(),
        }
    }

    pub(crate) fn shape_mismatch(name: &str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Whether the error comes from attaching to the wrong attribute rather
    /// than from the manifold map itself.
    pub fn is_attachment_error(&self) -> bool {
        !matches!(self, Self::Manifold(_))
    }

    /// Whether the error is a manifold configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Manifold(err) if err.is_configuration())
    }
}

/// Result type alias for the attachment layer.
pub type Result<T> = std::result::Result<T, ParametrizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping() {
        assert!(ParametrizeError::unknown("weight").is_attachment_error());
        let err: ParametrizeError = ManifoldError::configuration("rank 0").into();
        assert!(!err.is_attachment_error());
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "Invalid configuration: rank 0");
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = ParametrizeError::shape_mismatch("weight", &[3, 3], &[3, 4]);
        assert_eq!(
            err.to_string(),
            "Shape mismatch on 'weight': expected [3, 3], got [3, 4]"
        );
    }
}
