//! Error types for the sync layer.

use thiserror::Error;

/// Errors that can occur while reconciling or moving packets.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// A transport was configured with a fragment size too small for the packet header.
    #[error("fragment size {size} is below the {min} byte header budget")]
    InvalidFragmentSize { size: usize, min: usize },

    /// Connector operation failed.
    #[error("connector error: {0}")]
    Connector(#[from] synclets_store::ConnectorError),

    /// Codec, clock or value error.
    #[error(transparent)]
    Core(#[from] synclets_core::CoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
