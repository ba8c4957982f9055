//! Error types for ringlimit.

use thiserror::Error;

/// Main error type for ringlimit operations.
///
/// Admission decisions never fail; only loading and validating
/// configuration can produce an error.
#[derive(Error, Debug)]
pub enum RingLimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ringlimit operations.
pub type Result<T> = std::result::Result<T, RingLimitError>;
