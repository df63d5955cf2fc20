//! Error types for the throttle crate.

use thiserror::Error;

/// Main error type for rate limiting operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// The rate string could not be parsed
    #[error("Invalid rate '{0}': expected \"<count>/<s|m|h|d>\"")]
    InvalidRate(String),

    /// `incr` or `expire` was called for a key that is absent or expired
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The stored value for a key is not an integer counter
    #[error("Value stored at '{0}' is not an integer")]
    NotAnInteger(String),

    /// Connection failure or error reply from the shared counter service
    #[error("Transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ThrottleError {
    /// Whether this error reports a missing (or already expired) key.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, ThrottleError::KeyNotFound(_))
    }
}

impl From<config::ConfigError> for ThrottleError {
    fn from(err: config::ConfigError) -> Self {
        ThrottleError::Config(err.to_string())
    }
}

/// Result type alias for throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
