//! # Synclets Store
//!
//! The connector contract through which a Synclet reads and writes its two
//! trees, plus the connectors shipped with the workspace.
//!
//! ## Overview
//!
//! A Synclet owns one [`DataConnector`] (leaf values) and one
//! [`MetaConnector`] (leaf timestamps and ancestor hashes). Both address the
//! same depth-bounded tree. [`Connectors`] pairs them and exposes the
//! combined leaf / hash operations the reconciler works with.
//!
//! ## Key Types
//!
//! - [`DataConnector`] / [`MetaConnector`] - The async traits storage back ends implement
//! - [`MemoryDataConnector`] / [`MemoryMetaConnector`] - In-memory connectors
//! - [`SqliteDatabase`] - SQLite file holding both trees
//! - [`ValuesConnector`], [`TablesConnector`], ... - Adapters over small domain-shaped backends
//! - [`Attachment`] - Single-ownership claim carried by every connector
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use synclets_store::{Connectors, MemoryDataConnector, MemoryMetaConnector};
//!
//! let connectors = Connectors::new(
//!     Arc::new(MemoryDataConnector::new(3)),
//!     Arc::new(MemoryMetaConnector::new(3)),
//! )
//! .unwrap();
//! assert_eq!(connectors.depth(), 3);
//! ```

pub mod base;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use base::{
    TableBackend, TableConnector, TablesBackend, TablesConnector, ValueBackend, ValueConnector,
    ValuesBackend, ValuesConnector,
};
pub use error::{ConnectorError, Result};
pub use memory::{MemoryDataConnector, MemoryMetaConnector};
pub use sqlite::{SqliteDataConnector, SqliteDatabase, SqliteMetaConnector};
pub use traits::{
    Attachment, ChangeNotifier, ChangeReceiver, ChangeSender, Connectors, DataConnector,
    MetaConnector, TreeWalk,
};
