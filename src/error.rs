//! Error types for the Rategate service.

use thiserror::Error;

/// Main error type for Rategate operations.
///
/// A denied request is not an error: it is reported through
/// [`Decision`](crate::ratelimit::Decision). These variants cover
/// misconfiguration and I/O only.
#[derive(Error, Debug)]
pub enum RateGateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy failed validation at registration time
    #[error("Invalid policy '{namespace}': {reason}")]
    InvalidPolicy { namespace: String, reason: String },

    /// A lookup named a policy that is not in the catalogue
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RateGateError {
    fn from(err: config::ConfigError) -> Self {
        RateGateError::Config(err.to_string())
    }
}

/// Result type alias for Rategate operations.
pub type Result<T> = std::result::Result<T, RateGateError>;
