//! Error types for configuration resolution.

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// One or more required keys were absent or blank.
    ///
    /// Every missing key is reported together so a single diagnostic is enough
    /// to repair the deployment.
    #[error("missing configuration values: {}", keys.join(", "))]
    MissingKeys {
        /// Environment names of every missing key, in declaration order.
        keys: Vec<&'static str>,
    },
    /// A key was present but its value could not be parsed or was out of range.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidField {
        /// Environment name of the offending key.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when it is safe to echo (never set for secrets).
        value: Option<String>,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: &str) -> Self {
        Self::InvalidField {
            field,
            reason,
            value: Some(value.to_string()),
        }
    }

    /// Names of the keys reported missing, empty for other variants.
    #[must_use]
    pub fn missing_keys(&self) -> &[&'static str] {
        match self {
            Self::MissingKeys { keys } => keys,
            Self::InvalidField { .. } => &[],
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_message_names_every_key() {
        let err = ConfigError::MissingKeys {
            keys: vec!["MAILVAULT_SSH_HOST", "MAILVAULT_SSH_USER"],
        };
        assert_eq!(
            err.to_string(),
            "missing configuration values: MAILVAULT_SSH_HOST, MAILVAULT_SSH_USER"
        );
        assert_eq!(err.missing_keys().len(), 2);
    }

    #[test]
    fn invalid_field_carries_value() {
        let err = ConfigError::invalid("MAILVAULT_SSH_PORT", "not_a_port", "abc");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "MAILVAULT_SSH_PORT",
                value: Some(ref value),
                ..
            } if value == "abc"
        ));
        assert!(err.missing_keys().is_empty());
    }
}
