//! Error types for Synclets core.

use thiserror::Error;

/// Errors raised by codec, clock and value validation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The clock is at the largest encodable time and counter.
    #[error("clock cannot advance past the maximum timestamp")]
    ClockExhausted,
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
