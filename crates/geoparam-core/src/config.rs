//! Configuration value types shared by the manifold maps.

use crate::error::{ManifoldError, Result};
use crate::types::constants::DEFAULT_RADIUS;
use std::fmt;
use std::str::FromStr;

/// Map from skew-symmetric matrices onto the orthogonal group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Trivialization {
    /// Matrix exponential, surjective onto `SO(n)`.
    #[default]
    Expm,
    /// Cayley transform. Misses orthogonal matrices with eigenvalue -1.
    Cayley,
}

impl FromStr for Trivialization {
    type Err = ManifoldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "expm" => Ok(Self::Expm),
            "cayley" => Ok(Self::Cayley),
            other => Err(ManifoldError::configuration(format!(
                "unknown trivialization {other:?}, expected one of [\"expm\", \"cayley\"]"
            ))),
        }
    }
}

impl fmt::Display for Trivialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expm => "expm",
            Self::Cayley => "cayley",
        })
    }
}

/// Whether a base point stays put or follows the parametrized point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BaseMode {
    /// The base only changes on explicit initialization.
    #[default]
    Fixed,
    /// `update_base` recentres the chart at the current point.
    Dynamic,
}

/// Options for Stiefel, orthogonal and Grassmannian maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrthogonalConfig {
    /// Map from skew matrices to orthogonal ones
    pub triv: Trivialization,
    /// Base frame policy
    pub base_mode: BaseMode,
}

impl OrthogonalConfig {
    /// Sets the trivialization.
    pub fn with_triv(mut self, triv: Trivialization) -> Self {
        self.triv = triv;
        self
    }

    /// Sets the base frame policy.
    pub fn with_base_mode(mut self, base_mode: BaseMode) -> Self {
        self.base_mode = base_mode;
        self
    }
}

/// Options for sphere maps.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SphereConfig {
    /// Radius of the sphere
    pub radius: f64,
    /// Project the ambient rows (`x / ‖x‖`) instead of using a base chart
    pub embedded: bool,
    /// Base point policy of the chart
    pub base_mode: BaseMode,
}

impl Default for SphereConfig {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            embedded: false,
            base_mode: BaseMode::Fixed,
        }
    }
}

impl SphereConfig {
    /// Sets the radius.
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Selects the projection variant.
    pub fn with_embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }

    /// Sets the base point policy.
    pub fn with_base_mode(mut self, base_mode: BaseMode) -> Self {
        self.base_mode = base_mode;
        self
    }

    /// Fails unless the radius is positive and finite.
    pub fn validate(&self) -> Result<()> {
        if self.radius.is_finite() && self.radius > 0.0 {
            Ok(())
        } else {
            Err(ManifoldError::configuration(format!(
                "sphere radius must be positive, got {}",
                self.radius
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivialization_from_str() {
        assert_eq!("expm".parse::<Trivialization>().unwrap(), Trivialization::Expm);
        assert_eq!("cayley".parse::<Trivialization>().unwrap(), Trivialization::Cayley);
        let err = "qr".parse::<Trivialization>().unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(Trivialization::Cayley.to_string(), "cayley");
    }

    #[test]
    fn test_sphere_config_validation() {
        assert!(SphereConfig::default().validate().is_ok());
        assert!(SphereConfig::default().with_radius(0.0).validate().is_err());
        assert!(SphereConfig::default().with_radius(f64::NAN).validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde_round_trip() {
        let config = OrthogonalConfig::default()
            .with_triv(Trivialization::Cayley)
            .with_base_mode(BaseMode::Dynamic);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"triv":"cayley","base_mode":"dynamic"}"#);
        let back: OrthogonalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
