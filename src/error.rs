//! Error types for datacube fragmentation and import operations

use thiserror::Error;

/// Main error type for datacube operations
#[derive(Error, Debug)]
pub enum CubeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Allocation failure: {0}")]
    Allocation(String),

    #[error("Shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Specialized Result type for datacube operations
pub type Result<T> = std::result::Result<T, CubeError>;

impl From<bincode::Error> for CubeError {
    fn from(err: bincode::Error) -> Self {
        CubeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CubeError {
    fn from(err: serde_json::Error) -> Self {
        CubeError::Serialization(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for CubeError {
    fn from(err: std::collections::TryReserveError) -> Self {
        CubeError::Allocation(err.to_string())
    }
}
