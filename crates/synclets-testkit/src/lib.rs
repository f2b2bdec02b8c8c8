//! # Synclets Testkit
//!
//! Testing utilities for Synclets.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Timestamp encodings and hashes every implementation must agree on
//! - **Generators**: Proptest strategies for addresses, values and writes
//! - **Fixtures**: Groups of Synclets wired into pools, chains, rings and brokers
//!
//! ## Golden Vectors
//!
//! ```rust
//! use synclets_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use synclets_testkit::generators::writes;
//!
//! proptest! {
//!     #[test]
//!     fn replicas_converge(ws in writes(3, 2, 20)) {
//!         // apply each write to replica `w.replica`, then compare
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use synclets_testkit::fixtures::{Replicas, Topology};
//!
//! async fn example() {
//!     let replicas = Replicas::new(Topology::Ring, 4, 2).unwrap();
//!     replicas.start_all().await.unwrap();
//!     let result = replicas.wait_for_convergence(Duration::from_secs(1)).await.unwrap();
//!     assert!(result.is_converged());
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{init_tracing, settle, wait_for_convergence, ReplicaOptions, Replicas, Topology};
pub use generators::{leaf_address, value, writes, Write};
pub use vectors::{encoding_vectors, hash_vectors, hlc_vectors, verify_all_vectors};
