//! # Synclets Sync
//!
//! Hash-tree reconciliation between replicas and the packet plumbing that
//! carries it.
//!
//! ## Overview
//!
//! Two replicas converge by exchanging [`Message`](synclets_core::Message)s
//! that describe their trees one level at a time. Matching ancestor hashes
//! prune whole subtrees; differing ones are descended; leaves are resolved by
//! timestamp (last writer wins). Messages travel as packets small enough for
//! the transport and are reassembled on arrival.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Re-delivering a message changes nothing
//! - **Order-independent**: Fragments and messages may arrive in any order
//! - **Deterministic**: Every replica that has seen two writes picks the same winner
//! - **Incremental**: Only differing subtrees are transferred
//!
//! ## Message Flow
//!
//! ```text
//! Replica A                                Replica B
//!   |-- [root #h1, child #.., ...] ---------->|   root hashes differ
//!   |<------- [differing child + children] ---|   descend
//!   |-- [leaf ts/value] --------------------->|   B's leaf is older: apply
//!   |<------- [leaf ts/value] ----------------|   A's leaf is older: apply
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use synclets_sync::{fragment, Reassembler, HEADER_BUDGET};
//! use synclets_core::Message;
//!
//! let packets = fragment(&Message::new(vec![]), HEADER_BUDGET + 16).unwrap();
//! let mut reassembler = Reassembler::new();
//! let delivered: Vec<Message> = packets.iter().filter_map(|p| reassembler.receive(p)).collect();
//! assert_eq!(delivered.len(), 1);
//! ```

pub mod convergence;
pub mod envelope;
pub mod error;
pub mod packet;
pub mod reconciler;
pub mod transport;

pub use convergence::{
    expected_hashes, verify_convergence, verify_hash_chain, ConvergenceResult, HashMismatch,
};
pub use error::{Result, SyncError};
pub use packet::{
    fragment, validate_fragment_size, Packet, Reassembler, DEFAULT_FRAGMENT_SIZE, HEADER_BUDGET,
};
pub use reconciler::{Reconciler, Reconciliation};
pub use transport::{
    memory::{BrokerTransport, BusTransport, MemoryBroker, MemoryBus},
    send_message, PacketReceiver, PacketSender, Transport,
};
