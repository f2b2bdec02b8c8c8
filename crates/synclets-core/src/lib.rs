//! # Synclets Core
//!
//! Pure primitives for Synclets: addresses, values, timestamps, the hybrid
//! logical clock and the wire representation of reconciliation messages.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Address`] - Path of string ids locating a node in a depth-bounded tree
//! - [`Value`] - Leaf payload (string, number, boolean, null or tombstone)
//! - [`Timestamp`] - HLC-encoded string, ordered chronologically by plain string comparison
//! - [`Clock`] - Per-replica hybrid logical clock
//! - [`Message`] / [`MessageNode`] - Unit of reconciliation exchange
//! - [`DataNode`] / [`MetaNode`] - Snapshots of the data and metadata trees
//!
//! ## Encoding
//!
//! Timestamps use a 64-symbol alphabet whose ASCII order matches its numeric
//! order, so encoded strings sort the same way as the numbers they carry.
//! See the [`codec`] module.

pub mod clock;
pub mod codec;
pub mod error;
pub mod message;
pub mod tree;
pub mod types;

pub use clock::{Clock, ManualTimeSource, SystemTimeSource, TimeSource};
pub use codec::{content_hash, decode_hlc, encode_hlc, DecodedHlc};
pub use error::{CoreError, Result};
pub use message::{Context, Message, MessageNode};
pub use tree::{DataNode, MetaNode};
pub use types::{Address, Hash, Timestamp, Value, UNDEFINED_SENTINEL};
