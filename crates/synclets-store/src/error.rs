//! Error types for connectors.

use synclets_core::Address;
use thiserror::Error;

/// Errors that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Value or address (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock guarding connector state was poisoned by a panicking writer.
    #[error("connector state poisoned: {0}")]
    Poisoned(String),

    /// Address length does not suit the requested operation.
    #[error("address {address} is not valid here for depth {depth}")]
    InvalidAddress { address: Address, depth: usize },

    /// Data and meta connectors disagree on the tree depth.
    #[error("depth mismatch: data={data}, meta={meta}")]
    DepthMismatch { data: usize, meta: usize },

    /// Failure reported by a custom backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<std::sync::PoisonError<T>> for ConnectorError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ConnectorError::Poisoned(e.to_string())
    }
}

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;
