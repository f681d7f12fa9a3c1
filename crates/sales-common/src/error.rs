//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid {kind}: '{value}'")]
    InvalidOption { kind: &'static str, value: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommonError {
    pub fn invalid_env(key: &str, value: &str, reason: impl ToString) -> Self {
        Self::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
