//! Error types for dreamclimb-api
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.
//!
//! Unknown problem ids and tag keys are deliberately NOT errors: they are
//! dropped from the persisted sets and reported back to the caller. Only
//! malformed scalar input rejects a request.

use thiserror::Error;

/// Main error type for dreamclimb-api
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Malformed scalar input; rejects the whole request
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Convenience Result type using dreamclimb-api Error
pub type Result<T> = std::result::Result<T, Error>;
