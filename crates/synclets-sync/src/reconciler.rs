//! Hash-tree reconciliation.
//!
//! The reconciler compares an incoming description of a peer's tree with the
//! local one, one level at a time:
//!
//! - an ancestor whose hash matches is in sync and is not descended into;
//! - an ancestor whose hash differs is answered with the local children of
//!   that address, so the peer can narrow the difference;
//! - a leaf is resolved by timestamp: the greater string wins, the loser is
//!   answered with the winning leaf.
//!
//! ## Message shape
//!
//! A message built for address `A` carries `A` and each of its children:
//! ancestors by hash, leaves by timestamp and value. A leaf the replica does
//! not hold is described with the empty timestamp and a tombstone, which
//! loses against any real write.
//!
//! The reconciler holds no state of its own between exchanges. The caller
//! owns the [`Clock`] and must not run two mutations concurrently.

use std::cmp::Ordering;
use std::collections::HashSet;

use synclets_core::{Address, Clock, MessageNode, Timestamp, Value};
use synclets_store::{ConnectorError, Connectors};

use crate::convergence::expected_hashes;
use crate::error::Result;

/// Outcome of receiving one message.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciliation {
    /// Nodes to send back to the peer the message came from.
    pub reply: Vec<MessageNode>,
    /// Leaves whose value was replaced, to be pushed to every other peer.
    pub changed: Vec<Address>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.reply.is_empty() && self.changed.is_empty()
    }
}

/// Reply nodes, deduplicated by address.
#[derive(Default)]
struct Reply {
    nodes: Vec<MessageNode>,
    seen: HashSet<Address>,
}

impl Reply {
    fn push(&mut self, node: MessageNode) {
        if self.seen.insert(node.address().clone()) {
            self.nodes.push(node);
        }
    }

    fn extend(&mut self, nodes: Vec<MessageNode>) {
        for node in nodes {
            self.push(node);
        }
    }
}

/// Reconciles a replica's connectors against messages from peers.
#[derive(Clone)]
pub struct Reconciler {
    connectors: Connectors,
}

impl Reconciler {
    pub fn new(connectors: Connectors) -> Self {
        Self { connectors }
    }

    pub fn connectors(&self) -> &Connectors {
        &self.connectors
    }

    /// Describe `address` and its children.
    pub async fn build_message(&self, address: &Address) -> Result<Vec<MessageNode>> {
        if self.connectors.is_leaf(address) {
            return Ok(vec![self.leaf_node(address).await?]);
        }
        let mut nodes = vec![self.ancestor_node(address).await?];
        for id in self.connectors.read_child_ids(address).await? {
            nodes.push(self.describe(&address.child(id)).await?);
        }
        Ok(nodes)
    }

    /// Describe each of `addresses` on its own, for pushing changed leaves.
    pub async fn build_leaves(&self, addresses: &[Address]) -> Result<Vec<MessageNode>> {
        let mut reply = Reply::default();
        for address in addresses {
            reply.push(self.leaf_node(address).await?);
        }
        Ok(reply.nodes)
    }

    /// Compare every node of an incoming message with local state.
    ///
    /// Winning leaves are written, with their hash chain updated, before this
    /// returns. Every remote timestamp seen is merged into `clock`.
    pub async fn receive(&self, clock: &mut Clock, nodes: &[MessageNode]) -> Result<Reconciliation> {
        let mentioned: HashSet<&Address> = nodes.iter().map(MessageNode::address).collect();
        let mut reply = Reply::default();
        let mut changed = Vec::new();

        for node in nodes {
            match node {
                MessageNode::Ancestor { address, hash } => {
                    if self.connectors.is_leaf(address) || address.len() > self.connectors.depth() {
                        tracing::warn!(%address, "ignoring ancestor node at a leaf depth");
                        continue;
                    }
                    let local = self.connectors.read_hash(address).await?.unwrap_or(0);
                    if local == *hash {
                        continue;
                    }
                    let descended = nodes.iter().any(|n| address.is_parent_of(n.address()));
                    if descended {
                        for id in self.connectors.read_child_ids(address).await? {
                            let child = address.child(id);
                            if mentioned.contains(&child) {
                                continue;
                            }
                            if self.connectors.is_leaf(&child) {
                                reply.push(self.leaf_node(&child).await?);
                            } else {
                                reply.extend(self.build_message(&child).await?);
                            }
                        }
                    } else {
                        reply.extend(self.build_message(address).await?);
                    }
                }
                MessageNode::Leaf {
                    address,
                    timestamp,
                    value,
                } => {
                    if self
                        .receive_leaf(clock, address, timestamp, value, &mut reply)
                        .await?
                    {
                        changed.push(address.clone());
                    }
                }
            }
        }

        Ok(Reconciliation {
            reply: reply.nodes,
            changed,
        })
    }

    async fn receive_leaf(
        &self,
        clock: &mut Clock,
        address: &Address,
        timestamp: &Timestamp,
        value: &Value,
        reply: &mut Reply,
    ) -> Result<bool> {
        if !self.connectors.is_leaf(address) {
            tracing::warn!(%address, "ignoring leaf node at an ancestor depth");
            return Ok(false);
        }
        if let Err(e) = clock.observe(timestamp) {
            tracing::warn!(%address, error = %e, "ignoring leaf with malformed timestamp");
            return Ok(false);
        }

        let local = self.connectors.read_leaf(address).await?;
        let local_timestamp = local.as_ref().map(|(t, _)| t);
        let empty = Timestamp::empty();

        match timestamp.cmp(local_timestamp.unwrap_or(&empty)) {
            Ordering::Greater => {
                if let Err(e) = value.validate() {
                    tracing::warn!(%address, error = %e, "ignoring leaf with invalid value");
                    return Ok(false);
                }
                self.connectors.write_leaf(address, timestamp, value).await?;
                self.update_hash_chain(address, local_timestamp, timestamp)
                    .await?;
                tracing::debug!(%address, %timestamp, "applied remote change");
                Ok(true)
            }
            Ordering::Less => {
                if let Some((local_timestamp, local_value)) = local {
                    reply.push(MessageNode::Leaf {
                        address: address.clone(),
                        timestamp: local_timestamp,
                        value: local_value,
                    });
                }
                Ok(false)
            }
            Ordering::Equal => Ok(false),
        }
    }

    /// Write a local change with a fresh timestamp.
    pub async fn apply_local(&self, clock: &mut Clock, address: &Address, value: &Value) -> Result<Timestamp> {
        value.validate()?;
        self.check_leaf(address)?;
        let previous = self.connectors.meta().read_timestamp(address).await?;
        let timestamp = clock.next()?;
        self.connectors.write_leaf(address, &timestamp, value).await?;
        self.update_hash_chain(address, previous.as_ref(), &timestamp)
            .await?;
        Ok(timestamp)
    }

    /// Stamp a value that was changed directly in the data connector.
    pub async fn stamp_external(&self, clock: &mut Clock, address: &Address) -> Result<Timestamp> {
        self.check_leaf(address)?;
        let value = self
            .connectors
            .data()
            .read_value(address)
            .await?
            .unwrap_or(Value::Tombstone);
        value.validate()?;
        let previous = self.connectors.meta().read_timestamp(address).await?;
        let timestamp = clock.next()?;
        self.connectors
            .meta()
            .write_timestamp(address, &timestamp)
            .await?;
        self.update_hash_chain(address, previous.as_ref(), &timestamp)
            .await?;
        Ok(timestamp)
    }

    /// Bring the meta tree in line with whatever the connectors already hold.
    ///
    /// Every stored timestamp is observed first, then values without a
    /// (valid) timestamp are stamped, then every ancestor hash is recomputed.
    /// Returns the number of leaves stamped.
    pub async fn rebuild_hashes(&self, clock: &mut Clock) -> Result<usize> {
        let walk = self.connectors.walk().await?;
        let meta = self.connectors.meta();
        let mut unstamped = Vec::new();

        for leaf in &walk.leaves {
            match meta.read_timestamp(leaf).await? {
                Some(timestamp) if !timestamp.is_empty() => {
                    if let Err(e) = clock.observe(&timestamp) {
                        tracing::warn!(address = %leaf, error = %e, "restamping leaf with malformed timestamp");
                        unstamped.push(leaf);
                    }
                }
                _ => {
                    if self.connectors.data().read_value(leaf).await?.is_some() {
                        unstamped.push(leaf);
                    }
                }
            }
        }

        for leaf in &unstamped {
            meta.write_timestamp(leaf, &clock.next()?).await?;
        }

        for (address, hash) in expected_hashes(&self.connectors).await? {
            if self.connectors.read_hash(&address).await? != Some(hash) {
                self.connectors.write_hash(&address, hash).await?;
            }
        }
        Ok(unstamped.len())
    }

    /// XOR the old contribution out of, and the new one into, every ancestor.
    async fn update_hash_chain(
        &self,
        address: &Address,
        previous: Option<&Timestamp>,
        timestamp: &Timestamp,
    ) -> Result<()> {
        let delta = previous.map_or(0, Timestamp::content_hash) ^ timestamp.content_hash();
        if delta == 0 {
            return Ok(());
        }
        for ancestor in address.ancestors() {
            let hash = self.connectors.read_hash(&ancestor).await?.unwrap_or(0);
            self.connectors.write_hash(&ancestor, hash ^ delta).await?;
        }
        Ok(())
    }

    async fn describe(&self, address: &Address) -> Result<MessageNode> {
        if self.connectors.is_leaf(address) {
            self.leaf_node(address).await
        } else {
            self.ancestor_node(address).await
        }
    }

    async fn leaf_node(&self, address: &Address) -> Result<MessageNode> {
        let (timestamp, value) = self
            .connectors
            .read_leaf(address)
            .await?
            .unwrap_or((Timestamp::empty(), Value::Tombstone));
        Ok(MessageNode::Leaf {
            address: address.clone(),
            timestamp,
            value,
        })
    }

    async fn ancestor_node(&self, address: &Address) -> Result<MessageNode> {
        Ok(MessageNode::Ancestor {
            address: address.clone(),
            hash: self.connectors.read_hash(address).await?.unwrap_or(0),
        })
    }

    fn check_leaf(&self, address: &Address) -> Result<()> {
        if self.connectors.is_leaf(address) {
            Ok(())
        } else {
            Err(ConnectorError::InvalidAddress {
                address: address.clone(),
                depth: self.connectors.depth(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::{verify_convergence, verify_hash_chain};
    use proptest::prelude::*;
    use std::sync::Arc;
    use synclets_core::{ManualTimeSource, TimeSource};
    use synclets_store::{DataConnector, MemoryDataConnector, MemoryMetaConnector};

    struct Replica {
        reconciler: Reconciler,
        clock: Clock,
        time: Arc<ManualTimeSource>,
    }

    impl Replica {
        fn new(name: &str, depth: usize, now: u64) -> Self {
            Self::with_data(name, Arc::new(MemoryDataConnector::new(depth)), now)
        }

        fn with_data(name: &str, data: Arc<MemoryDataConnector>, now: u64) -> Self {
            let depth = data.depth();
            let connectors =
                Connectors::new(data, Arc::new(MemoryMetaConnector::new(depth))).unwrap();
            let time = Arc::new(ManualTimeSource::new(now));
            Self {
                reconciler: Reconciler::new(connectors),
                clock: Clock::new(name, time.clone() as Arc<dyn TimeSource>),
                time,
            }
        }

        async fn set(&mut self, ids: &[&str], value: Value) -> Timestamp {
            self.reconciler
                .apply_local(&mut self.clock, &Address::new(ids.iter().copied()), &value)
                .await
                .unwrap()
        }

        async fn receive(&mut self, nodes: &[MessageNode]) -> Reconciliation {
            self.reconciler.receive(&mut self.clock, nodes).await.unwrap()
        }

        fn connectors(&self) -> Connectors {
            self.reconciler.connectors().clone()
        }
    }

    /// Run root syncs in both directions until neither side has anything to say.
    async fn sync_pair(a: &mut Replica, b: &mut Replica) -> usize {
        let mut to_b = a.reconciler.build_message(&Address::root()).await.unwrap();
        let mut to_a = b.reconciler.build_message(&Address::root()).await.unwrap();
        let mut rounds = 0;
        while !(to_a.is_empty() && to_b.is_empty()) {
            rounds += 1;
            assert!(rounds < 32, "sync did not settle");
            let from_b = b.receive(&to_b).await;
            let from_a = a.receive(&to_a).await;
            to_a = from_b.reply;
            to_b = from_a.reply;
        }
        rounds
    }

    #[tokio::test]
    async fn test_build_message_lists_children() {
        let mut r = Replica::new("r", 2, 1_000);
        let ts = r.set(&["t", "a"], Value::from("x")).await;

        let root = r.reconciler.build_message(&Address::root()).await.unwrap();
        assert_eq!(
            root,
            vec![
                MessageNode::Ancestor {
                    address: Address::root(),
                    hash: ts.content_hash()
                },
                MessageNode::Ancestor {
                    address: Address::new(["t"]),
                    hash: ts.content_hash()
                },
            ]
        );

        let leaf = r
            .reconciler
            .build_message(&Address::new(["t", "a"]))
            .await
            .unwrap();
        assert_eq!(
            leaf,
            vec![MessageNode::Leaf {
                address: Address::new(["t", "a"]),
                timestamp: ts,
                value: Value::from("x"),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_leaf_described_as_empty() {
        let r = Replica::new("r", 1, 1_000);
        let nodes = r
            .reconciler
            .build_message(&Address::new(["nope"]))
            .await
            .unwrap();
        assert_eq!(
            nodes,
            vec![MessageNode::Leaf {
                address: Address::new(["nope"]),
                timestamp: Timestamp::empty(),
                value: Value::Tombstone,
            }]
        );
    }

    #[tokio::test]
    async fn test_apply_local_keeps_hash_chain() {
        let mut r = Replica::new("r", 3, 1_000);
        r.set(&["a", "b", "c"], Value::from(1.0)).await;
        r.set(&["a", "b", "d"], Value::from(2.0)).await;
        r.set(&["a", "b", "c"], Value::Tombstone).await;
        r.set(&["z", "y", "x"], Value::Null).await;

        assert!(verify_hash_chain(&r.connectors()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_local_rejects_bad_input() {
        let mut r = Replica::new("r", 2, 1_000);
        let err = r
            .reconciler
            .apply_local(&mut r.clock, &Address::new(["a"]), &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::SyncError::Connector(ConnectorError::InvalidAddress { .. })
        ));

        let err = r
            .reconciler
            .apply_local(&mut r.clock, &Address::new(["a", "b"]), &Value::Number(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::SyncError::Core(_)));
    }

    #[tokio::test]
    async fn test_newer_leaf_applied() {
        let mut a = Replica::new("a", 1, 1_000);
        let mut b = Replica::new("b", 1, 5_000);
        b.set(&["k"], Value::from("remote")).await;

        let nodes = b.reconciler.build_message(&Address::new(["k"])).await.unwrap();
        let outcome = a.receive(&nodes).await;

        assert_eq!(outcome.changed, vec![Address::new(["k"])]);
        assert!(outcome.reply.is_empty());
        assert_eq!(
            a.connectors().get_data().await.unwrap(),
            b.connectors().get_data().await.unwrap()
        );
        assert!(verify_hash_chain(&a.connectors()).await.unwrap().is_empty());

        // Observed: the next local write sorts after the remote one.
        let next = a.set(&["k"], Value::from("local")).await;
        assert!(next > b.connectors().read_leaf(&Address::new(["k"])).await.unwrap().unwrap().0);
    }

    #[tokio::test]
    async fn test_older_leaf_answered() {
        let mut a = Replica::new("a", 1, 9_000);
        let mut b = Replica::new("b", 1, 1_000);
        a.set(&["k"], Value::from("newer")).await;
        b.set(&["k"], Value::from("older")).await;

        let nodes = b.reconciler.build_message(&Address::new(["k"])).await.unwrap();
        let outcome = a.receive(&nodes).await;

        assert!(outcome.changed.is_empty());
        assert_eq!(
            outcome.reply,
            a.reconciler.build_message(&Address::new(["k"])).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let mut a = Replica::new("a", 2, 1_000);
        let mut b = Replica::new("b", 2, 2_000);
        b.set(&["t", "r"], Value::from("v")).await;
        let nodes = b
            .reconciler
            .build_message(&Address::new(["t", "r"]))
            .await
            .unwrap();

        let first = a.receive(&nodes).await;
        assert_eq!(first.changed.len(), 1);
        let meta = a.connectors().get_meta().await.unwrap();

        let second = a.receive(&nodes).await;
        assert!(second.is_empty());
        assert_eq!(a.connectors().get_meta().await.unwrap(), meta);
    }

    #[tokio::test]
    async fn test_malformed_timestamp_ignored() {
        let mut a = Replica::new("a", 1, 1_000);
        let outcome = a
            .receive(&[MessageNode::Leaf {
                address: Address::new(["k"]),
                timestamp: Timestamp::from_encoded("~~~~~~~~~~~~~~~~"),
                value: Value::from("evil"),
            }])
            .await;
        assert!(outcome.is_empty());
        assert_eq!(a.connectors().read_leaf(&Address::new(["k"])).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_depth_nodes_ignored() {
        let mut a = Replica::new("a", 2, 1_000);
        let outcome = a
            .receive(&[
                MessageNode::Ancestor {
                    address: Address::new(["t", "r"]),
                    hash: 1,
                },
                MessageNode::Leaf {
                    address: Address::new(["t"]),
                    timestamp: Timestamp::from_encoded("0000000000000000"),
                    value: Value::Null,
                },
            ])
            .await;
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn test_pair_converges() {
        let mut a = Replica::new("a", 2, 1_000);
        let mut b = Replica::new("b", 2, 1_000);
        a.set(&["t", "x"], Value::from("ax")).await;
        a.set(&["u", "shared"], Value::from("from a")).await;
        b.set(&["t", "y"], Value::from("by")).await;
        b.time.advance(10);
        b.set(&["u", "shared"], Value::from("from b")).await;
        b.set(&["w", "gone"], Value::Tombstone).await;

        sync_pair(&mut a, &mut b).await;

        let result = verify_convergence(&[a.connectors(), b.connectors()])
            .await
            .unwrap();
        assert!(result.is_converged(), "{:?}", result);
        assert_eq!(
            a.connectors()
                .data()
                .read_value(&Address::new(["u", "shared"]))
                .await
                .unwrap(),
            Some(Value::from("from b"))
        );
        assert!(verify_hash_chain(&a.connectors()).await.unwrap().is_empty());
        assert!(verify_hash_chain(&b.connectors()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_synced_pair_exchanges_one_round() {
        let mut a = Replica::new("a", 1, 1_000);
        let mut b = Replica::new("b", 1, 1_000);
        a.set(&["k"], Value::from(1.0)).await;
        sync_pair(&mut a, &mut b).await;

        assert_eq!(sync_pair(&mut a, &mut b).await, 1);
    }

    #[tokio::test]
    async fn test_depth_zero_pair_converges() {
        let mut a = Replica::new("a", 0, 1_000);
        let mut b = Replica::new("b", 0, 3_000);
        a.set(&[], Value::from("old")).await;
        b.set(&[], Value::from("new")).await;

        sync_pair(&mut a, &mut b).await;

        assert_eq!(
            a.connectors().data().read_value(&Address::root()).await.unwrap(),
            Some(Value::from("new"))
        );
    }

    #[tokio::test]
    async fn test_rebuild_hashes_stamps_existing_data() {
        let data = Arc::new(MemoryDataConnector::new(2));
        data.write_value(&Address::new(["t", "a"]), &Value::from("pre"))
            .await
            .unwrap();
        data.write_value(&Address::new(["t", "b"]), &Value::from("existing"))
            .await
            .unwrap();
        let mut r = Replica::with_data("r", data, 1_000);

        let stamped = r.reconciler.rebuild_hashes(&mut r.clock).await.unwrap();
        assert_eq!(stamped, 2);
        assert!(verify_hash_chain(&r.connectors()).await.unwrap().is_empty());
        assert!(r
            .connectors()
            .read_leaf(&Address::new(["t", "a"]))
            .await
            .unwrap()
            .is_some());

        assert_eq!(r.reconciler.rebuild_hashes(&mut r.clock).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stamp_external() {
        let data = Arc::new(MemoryDataConnector::new(1));
        let mut r = Replica::with_data("r", data.clone(), 1_000);
        let first = r.set(&["k"], Value::from("mine")).await;

        data.external_set(&Address::new(["k"]), Value::from("theirs"))
            .unwrap();
        let stamped = r
            .reconciler
            .stamp_external(&mut r.clock, &Address::new(["k"]))
            .await
            .unwrap();

        assert!(stamped > first);
        assert_eq!(
            r.connectors().read_leaf(&Address::new(["k"])).await.unwrap(),
            Some((stamped, Value::from("theirs")))
        );
        assert!(verify_hash_chain(&r.connectors()).await.unwrap().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Write {
        A(Vec<String>, i64),
        B(Vec<String>, i64),
        Tick(u64),
    }

    fn write() -> impl Strategy<Value = Write> {
        let address = prop::collection::vec("[a-c]", 2);
        prop_oneof![
            (address.clone(), any::<i64>()).prop_map(|(ids, v)| Write::A(ids, v)),
            (address, any::<i64>()).prop_map(|(ids, v)| Write::B(ids, v)),
            (0u64..5).prop_map(Write::Tick),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn pair_converges_with_valid_hash_chains(writes in prop::collection::vec(write(), 0..24)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let mut a = Replica::new("a", 2, 1_000);
                let mut b = Replica::new("b", 2, 1_000);
                for w in writes {
                    match w {
                        Write::A(ids, v) => {
                            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                            a.set(&ids, Value::from(v)).await;
                        }
                        Write::B(ids, v) => {
                            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                            b.set(&ids, Value::from(v)).await;
                        }
                        Write::Tick(ms) => {
                            a.time.advance(ms);
                            b.time.advance(ms);
                        }
                    }
                }
                sync_pair(&mut a, &mut b).await;

                assert!(verify_convergence(&[a.connectors(), b.connectors()])
                    .await
                    .unwrap()
                    .is_converged());
                assert!(verify_hash_chain(&a.connectors()).await.unwrap().is_empty());
            });
        }
    }
}
