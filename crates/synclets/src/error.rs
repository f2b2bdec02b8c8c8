//! Error types for the Synclet.

use std::fmt;

use synclets_core::{Address, CoreError};
use synclets_store::ConnectorError;
use synclets_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during Synclet operations.
#[derive(Debug, Error)]
pub enum SyncletError {
    /// A connector or transport is already owned by another Synclet.
    #[error("{0} is already attached to a synclet")]
    AlreadyAttached(String),

    /// Address length does not match the Synclet depth.
    #[error("address {address} does not name a leaf at depth {depth}")]
    InvalidAddress { address: Address, depth: usize },

    /// A connector was built for a different depth.
    #[error("depth mismatch: synclet={expected}, {component}={actual}")]
    DepthMismatch {
        expected: usize,
        component: &'static str,
        actual: usize,
    },

    /// Value cannot be stored or sent.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The Synclet has been destroyed.
    #[error("synclet destroyed")]
    Destroyed,

    /// The operation needs a started Synclet.
    #[error("synclet not started")]
    NotStarted,

    /// Some transports failed to connect or send. The others remain in use.
    #[error("{} transport(s) failed: {}", .0.len(), TransportFailures(.0))]
    TransportsFailed(Vec<TransportFailure>),

    /// Connector error.
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// One transport that failed, by its position in the builder.
#[derive(Debug)]
pub struct TransportFailure {
    pub index: usize,
    pub error: SyncError,
}

struct TransportFailures<'a>(&'a [TransportFailure]);

impl fmt::Display for TransportFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "#{}: {}", failure.index, failure.error)?;
        }
        Ok(())
    }
}

/// Result type for Synclet operations.
pub type Result<T> = std::result::Result<T, SyncletError>;
