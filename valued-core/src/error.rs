//! Error types for valued-core

use thiserror::Error;

use crate::validate::Violation;

/// Main error type for the valued-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Event payload failed category validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Configuration error (missing token, bad endpoint, unreadable config file)
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP delivery failure. Only ever observed inside the dispatcher.
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One or more violations found while validating an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid event: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    /// Returns true if the given violation was reported
    pub fn contains(&self, violation: &Violation) -> bool {
        self.violations.contains(violation)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for valued-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message() {
        let err = ValidationError::new(vec![Violation::MissingUserId, Violation::MissingUrl]);
        assert_eq!(
            err.to_string(),
            "invalid event: missing user.id, missing attributes.source.url"
        );
        assert!(err.contains(&Violation::MissingUrl));
    }

    #[test]
    fn test_error_wraps_validation_transparently() {
        let err: Error = ValidationError::new(vec![Violation::MissingCategory]).into();
        assert_eq!(err.to_string(), "invalid event: missing category");
    }
}
