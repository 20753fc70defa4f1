//! Error taxonomy for the analytics engine
//!
//! Empty record sets are not errors: they come back as a payload with `None`
//! metrics and a message. Only missing entities, caller mistakes, engine
//! misconfiguration and storage failures are represented here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// A referenced route/driver/client/branch/carrier/shipment does not exist.
    #[error("{entity_type} not found: {key}")]
    NotFound { entity_type: String, key: String },

    /// Internal defect, e.g. scoring weights that do not sum to 1.0.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller supplied a value outside an enumerable vocabulary.
    #[error("invalid {argument} '{value}'. Valid options: {}", valid.join(", "))]
    InvalidArgument {
        argument: &'static str,
        value: String,
        valid: Vec<&'static str>,
    },

    /// The fact source or storage adapter failed.
    #[error("fact source error: {0}")]
    Source(#[from] anyhow::Error),
}

impl AnalyticsError {
    pub fn not_found(entity_type: impl ToString, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            key: key.into(),
        }
    }

    pub fn invalid_argument(
        argument: &'static str,
        value: impl Into<String>,
        valid: &[&'static str],
    ) -> Self {
        Self::InvalidArgument {
            argument,
            value: value.into(),
            valid: valid.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_lists_options() {
        let err = AnalyticsError::invalid_argument("dimension", "vehicle", &["route", "driver"]);
        assert_eq!(
            err.to_string(),
            "invalid dimension 'vehicle'. Valid options: route, driver"
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = AnalyticsError::not_found("route", "R-404");
        assert_eq!(err.to_string(), "route not found: R-404");
    }
}
