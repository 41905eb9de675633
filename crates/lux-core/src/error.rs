//! Error types for cell content.

use thiserror::Error;

/// Errors raised while validating cell content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed field value
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Index outside its cell
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
