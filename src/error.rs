//! ═══════════════════════════════════════════════════════════════════════════════
//! ERROR — Unified Error Type for Varflip
//! ═══════════════════════════════════════════════════════════════════════════════
//! Attack outcomes (success, exhausted, moot) are values, not errors. This type
//! only covers things that stop an attack call from producing an outcome at all.
//! ═══════════════════════════════════════════════════════════════════════════════

use std::fmt;

use crate::oracle::OracleError;

/// The unified error type for the varflip crate
#[derive(Debug)]
pub enum VarflipError {
    /// I/O error (persisted JSON lines, config files)
    Io(std::io::Error),
    /// JSON serialization/deserialization error
    Json(serde_json::Error),
    /// The target model failed to score a batch
    Oracle(OracleError),
    /// Configuration error
    Config(ConfigError),
    /// Malformed caller input
    Validation(String),
}

impl std::error::Error for VarflipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VarflipError::Io(e) => Some(e),
            VarflipError::Json(e) => Some(e),
            VarflipError::Oracle(e) => Some(e),
            VarflipError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for VarflipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarflipError::Io(e) => write!(f, "I/O error: {}", e),
            VarflipError::Json(e) => write!(f, "JSON error: {}", e),
            VarflipError::Oracle(e) => write!(f, "Oracle error: {}", e),
            VarflipError::Config(e) => write!(f, "Configuration error: {}", e),
            VarflipError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl From<std::io::Error> for VarflipError {
    fn from(err: std::io::Error) -> Self {
        VarflipError::Io(err)
    }
}

impl From<serde_json::Error> for VarflipError {
    fn from(err: serde_json::Error) -> Self {
        VarflipError::Json(err)
    }
}

impl From<OracleError> for VarflipError {
    fn from(err: OracleError) -> Self {
        VarflipError::Oracle(err)
    }
}

/// Configuration-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A numeric field is outside its legal range
    OutOfRange { field: String, reason: String },
    /// Environment override could not be parsed
    BadOverride { var: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange { field, reason } => {
                write!(f, "{} out of range: {}", field, reason)
            }
            ConfigError::BadOverride { var, value } => {
                write!(f, "cannot parse {}={}", var, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for VarflipError {
    fn from(err: ConfigError) -> Self {
        VarflipError::Config(err)
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, VarflipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VarflipError::Validation("empty program".to_string());
        assert_eq!(err.to_string(), "Validation error: empty program");

        let err: VarflipError = ConfigError::OutOfRange {
            field: "batch_size".to_string(),
            reason: "must be > 0".to_string(),
        }
        .into();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_oracle_error_conversion() {
        let err: VarflipError = OracleError::Timeout.into();
        assert!(matches!(err, VarflipError::Oracle(OracleError::Timeout)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: VarflipError = io.into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
