//! Error handling for Hearth Scene
//!
//! One engine-level error type; stage errors in `scene::error` convert into it.

use std::error::Error as StdError;
use std::fmt;

/// Main error type for Hearth Scene
#[derive(Debug)]
pub enum EngineError {
    // Threading Errors
    ChannelClosed {
        name: String,
    },

    // Configuration Errors
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    ValidationFailed(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ChannelClosed { name } => write!(f, "Channel closed: {}", name),
            EngineError::InvalidConfig {
                field,
                value,
                reason,
            } => write!(f, "Invalid config: {} = {} ({})", field, value, reason),
            EngineError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
        }
    }
}

impl StdError for EngineError {}

/// Type alias for Results in Hearth Scene
pub type EngineResult<T> = Result<T, EngineError>;
