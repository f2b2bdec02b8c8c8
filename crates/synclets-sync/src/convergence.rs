//! Convergence and hash-chain verification.
//!
//! After a round of syncing, replicas can be checked against each other by
//! comparing full snapshots, and each replica can be checked on its own by
//! recomputing every ancestor hash from its leaves.

use std::collections::BTreeMap;

use synclets_core::{Address, Hash};
use synclets_store::Connectors;

use crate::error::Result;

/// Recompute every ancestor hash from the stored leaf timestamps.
///
/// Every ancestor present in either tree appears in the result, with 0 when
/// no timestamped leaf lies beneath it.
pub async fn expected_hashes(connectors: &Connectors) -> Result<BTreeMap<Address, Hash>> {
    let walk = connectors.walk().await?;
    let mut hashes: BTreeMap<Address, Hash> =
        walk.ancestors.into_iter().map(|address| (address, 0)).collect();

    for leaf in &walk.leaves {
        let Some(timestamp) = connectors.meta().read_timestamp(leaf).await? else {
            continue;
        };
        let contribution = timestamp.content_hash();
        for ancestor in leaf.ancestors() {
            *hashes.entry(ancestor).or_insert(0) ^= contribution;
        }
    }
    Ok(hashes)
}

/// An ancestor whose stored hash disagrees with its leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub address: Address,
    pub stored: Option<Hash>,
    pub expected: Hash,
}

/// Check the hash-consistency invariant of one replica.
///
/// A missing stored hash is accepted where the expected hash is 0.
pub async fn verify_hash_chain(connectors: &Connectors) -> Result<Vec<HashMismatch>> {
    let mut mismatches = Vec::new();
    for (address, expected) in expected_hashes(connectors).await? {
        let stored = connectors.read_hash(&address).await?;
        if stored.unwrap_or(0) != expected {
            mismatches.push(HashMismatch {
                address,
                stored,
                expected,
            });
        }
    }
    Ok(mismatches)
}

/// Result of comparing replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Every replica holds identical data and meta trees.
    Converged,
    /// Replica `replica` differs from replica 0.
    Diverged { replica: usize, reason: String },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare the data and meta snapshots of every replica with the first.
pub async fn verify_convergence(replicas: &[Connectors]) -> Result<ConvergenceResult> {
    let Some((first, rest)) = replicas.split_first() else {
        return Ok(ConvergenceResult::Converged);
    };
    let data = first.get_data().await?;
    let meta = first.get_meta().await?;

    for (i, replica) in rest.iter().enumerate() {
        if replica.get_data().await? != data {
            return Ok(ConvergenceResult::Diverged {
                replica: i + 1,
                reason: "data tree differs".into(),
            });
        }
        if replica.get_meta().await? != meta {
            return Ok(ConvergenceResult::Diverged {
                replica: i + 1,
                reason: "meta tree differs".into(),
            });
        }
    }
    Ok(ConvergenceResult::Converged)
}
