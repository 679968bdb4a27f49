//! Position engine configuration.
//!
//! # Responsibility
//! - Hold tunables for key spacing, exhaustion detection and write batching.
//! - Parse configuration documents supplied by the host application.
//!
//! # Invariants
//! - A validated config has finite positive spacing, positive `min_gap` and a
//!   chunk size of at least one.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Spacing used when a collection has fewer than two keys.
pub const DEFAULT_SPACING: f64 = 50.0;
/// Smallest interval accepted between two computed keys.
pub const DEFAULT_MIN_GAP: f64 = 1e-6;
/// Number of absolute assignments written per store call.
pub const DEFAULT_ASSIGNMENT_CHUNK_SIZE: usize = 25;

/// Errors from configuration parsing and validation.
#[derive(Debug)]
pub enum ConfigError {
    /// Input is not a valid configuration document.
    Parse(serde_json::Error),
    /// A field holds a value outside its accepted range.
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid engine config: {err}"),
            Self::Invalid { field, reason } => {
                write!(f, "invalid engine config field `{field}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Tunables for the position engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Key spacing for empty collections, tail fallback and re-spacing.
    pub default_spacing: f64,
    /// Intervals below this value count as key-space exhaustion.
    pub min_gap: f64,
    /// Absolute assignments per concurrent store write.
    pub assignment_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_spacing: DEFAULT_SPACING,
            min_gap: DEFAULT_MIN_GAP,
            assignment_chunk_size: DEFAULT_ASSIGNMENT_CHUNK_SIZE,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    ///
    /// Missing fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_spacing.is_finite() || self.default_spacing <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "default_spacing",
                reason: format!("must be finite and > 0, got {}", self.default_spacing),
            });
        }
        if !self.min_gap.is_finite() || self.min_gap <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "min_gap",
                reason: format!("must be finite and > 0, got {}", self.min_gap),
            });
        }
        if self.min_gap >= self.default_spacing {
            return Err(ConfigError::Invalid {
                field: "min_gap",
                reason: format!(
                    "must be smaller than default_spacing ({}), got {}",
                    self.default_spacing, self.min_gap
                ),
            });
        }
        if self.assignment_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "assignment_chunk_size",
                reason: "must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, DEFAULT_MIN_GAP, DEFAULT_SPACING};

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.default_spacing, DEFAULT_SPACING);
        assert_eq!(config.min_gap, DEFAULT_MIN_GAP);
    }

    #[test]
    fn partial_document_overrides_only_given_fields() {
        let config = EngineConfig::from_json_str(r#"{"default_spacing": 10.0}"#).unwrap();
        assert_eq!(config.default_spacing, 10.0);
        assert_eq!(config.assignment_chunk_size, 25);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{"spacing": 10.0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn non_positive_spacing_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"default_spacing": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "default_spacing",
                ..
            }
        ));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = EngineConfig {
            assignment_chunk_size: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_gap_must_stay_below_spacing() {
        let config = EngineConfig {
            default_spacing: 1.0,
            min_gap: 2.0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_gap"));
    }
}
