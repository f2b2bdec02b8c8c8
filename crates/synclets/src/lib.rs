//! # Synclets
//!
//! Tree-shaped key/value data kept consistent across replicas.
//!
//! ## Overview
//!
//! A [`Synclet`] is one replica. It stores leaf values through a data
//! connector and their timestamps and ancestor hashes through a meta
//! connector, and talks to peers through any number of transports:
//!
//! - **Clock**: Every write is stamped with a hybrid logical clock
//! - **Reconciliation**: Peers compare ancestor hashes and descend only where they differ
//! - **Last writer wins**: The greatest timestamp decides every leaf
//! - **Packets**: Messages are split to fit each transport and reassembled on arrival
//!
//! ## Key Concepts
//!
//! - **Address**: A path of ids. Leaves sit exactly `depth` ids below the root.
//! - **Tombstone**: A deleted leaf keeps its timestamp so the delete replicates.
//! - **Context**: Key/value metadata carried with a message and checked by hooks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use synclets::{Address, MemoryBus, Synclet, SyncletConfig};
//!
//! async fn example() -> synclets::Result<()> {
//!     let bus = MemoryBus::new();
//!     let alice = Synclet::builder(SyncletConfig::with_depth(2))
//!         .transport(Arc::new(bus.transport()))
//!         .build()?;
//!     let bob = Synclet::builder(SyncletConfig::with_depth(2))
//!         .transport(Arc::new(bus.transport()))
//!         .build()?;
//!     alice.start().await?;
//!     bob.start().await?;
//!
//!     alice.set_value(&Address::new(["pets", "fido"]), "dog").await?;
//!     // bob converges once the message is delivered
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `synclets::core` - Addresses, values, timestamps, the clock and the wire message
//! - `synclets::store` - Data and meta connectors (memory, adapters, SQLite)
//! - `synclets::sync` - Reconciler, packets and transports

pub mod error;
pub mod synclet;

pub use synclets_core as core;
pub use synclets_store as store;
pub use synclets_sync as sync;

pub use error::{Result, SyncletError, TransportFailure};
pub use synclet::{DefaultHooks, Status, Synclet, SyncletBuilder, SyncletConfig, SyncletHooks};

pub use synclets_core::{
    Address, Context, DataNode, ManualTimeSource, MetaNode, TimeSource, Timestamp, Value,
};
pub use synclets_store::{DataConnector, MemoryDataConnector, MemoryMetaConnector, MetaConnector};
pub use synclets_sync::{MemoryBroker, MemoryBus, Transport};
