//! Connector traits: the abstract interface for tree persistence.
//!
//! A data connector stores leaf values; a meta connector stores leaf
//! timestamps and ancestor hashes. Both are addressed by [`Address`] over a
//! tree of fixed depth. Intermediate nodes are materialized on first write.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use synclets_core::{Address, DataNode, Hash, MetaNode, Timestamp, Value};

use crate::error::{ConnectorError, Result};

/// Channel on which a data connector reports values changed outside the Synclet.
pub type ChangeSender = mpsc::UnboundedSender<Address>;
pub type ChangeReceiver = mpsc::UnboundedReceiver<Address>;

/// Single-ownership claim embedded in every connector and transport.
#[derive(Debug, Default)]
pub struct Attachment {
    claimed: AtomicBool,
}

impl Attachment {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Claim ownership. Returns false if already owned.
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.claimed.store(false, Ordering::SeqCst);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

/// Holds the change channel registered by the owning Synclet, if any.
///
/// Changes reported while nobody is listening are kept and replayed into the
/// next registered channel, so a stopped Synclet still learns about them.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    state: Mutex<NotifierState>,
}

#[derive(Debug, Default)]
struct NotifierState {
    sender: Option<ChangeSender>,
    pending: BTreeSet<Address>,
}

impl ChangeNotifier {
    /// Register the change channel and replay anything reported meanwhile.
    pub fn register(&self, sender: ChangeSender) -> Result<()> {
        let mut state = self.state.lock()?;
        while let Some(address) = state.pending.pop_first() {
            if let Err(mpsc::error::SendError(address)) = sender.send(address) {
                state.pending.insert(address);
                return Ok(());
            }
        }
        state.sender = Some(sender);
        Ok(())
    }

    /// Drop the registered sender. Later changes are held until the next
    /// [`register`](Self::register).
    pub fn unregister(&self) -> Result<()> {
        self.state.lock()?.sender = None;
        Ok(())
    }

    /// Report a changed leaf. Returns whether it was delivered now; if not
    /// it stays pending.
    pub fn notify(&self, address: Address) -> Result<bool> {
        let mut state = self.state.lock()?;
        let address = match state.sender.as_ref() {
            Some(tx) => match tx.send(address) {
                Ok(()) => return Ok(true),
                Err(mpsc::error::SendError(address)) => address,
            },
            None => address,
        };
        state.sender = None;
        state.pending.insert(address);
        Ok(false)
    }

    /// Number of changes waiting for a listener.
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.state.lock()?.pending.len())
    }
}

/// Storage for leaf values.
///
/// # Design Notes
///
/// - `read_child_ids` works at any ancestor address and lists only children
///   that exist.
/// - `write_value` is only valid at leaf addresses (length == depth).
/// - The tombstone is stored like any other value.
#[async_trait]
pub trait DataConnector: Send + Sync {
    /// Depth of every leaf address.
    fn depth(&self) -> usize;

    /// Ownership claim for this connector.
    fn attachment(&self) -> &Attachment;

    /// Start reporting external changes on `changes`.
    async fn connect(&self, changes: ChangeSender) -> Result<()> {
        drop(changes);
        Ok(())
    }

    /// Stop reporting changes.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>>;

    async fn read_value(&self, address: &Address) -> Result<Option<Value>>;

    async fn write_value(&self, address: &Address, value: &Value) -> Result<()>;

    /// Full snapshot of the data tree.
    async fn get_data(&self) -> Result<DataNode> {
        let depth = self.depth();
        let mut tree = DataNode::default();
        let mut pending = vec![Address::root()];
        while let Some(address) = pending.pop() {
            if address.len() == depth {
                if let Some(value) = self.read_value(&address).await? {
                    tree.set_value(address.ids(), value);
                }
            } else {
                for id in self.read_child_ids(&address).await? {
                    pending.push(address.child(id));
                }
            }
        }
        Ok(tree)
    }
}

/// Storage for leaf timestamps and ancestor hashes.
#[async_trait]
pub trait MetaConnector: Send + Sync {
    fn depth(&self) -> usize;

    fn attachment(&self) -> &Attachment;

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>>;

    async fn read_timestamp(&self, address: &Address) -> Result<Option<Timestamp>>;

    async fn write_timestamp(&self, address: &Address, timestamp: &Timestamp) -> Result<()>;

    async fn read_hash(&self, address: &Address) -> Result<Option<Hash>>;

    async fn write_hash(&self, address: &Address, hash: Hash) -> Result<()>;

    /// Full snapshot of the metadata tree.
    async fn get_meta(&self) -> Result<MetaNode> {
        let depth = self.depth();
        let mut tree = MetaNode::default();
        let mut pending = vec![Address::root()];
        while let Some(address) = pending.pop() {
            if address.len() == depth {
                if let Some(timestamp) = self.read_timestamp(&address).await? {
                    tree.set_timestamp(address.ids(), timestamp);
                }
            } else {
                if let Some(hash) = self.read_hash(&address).await? {
                    tree.set_hash(address.ids(), hash);
                }
                for id in self.read_child_ids(&address).await? {
                    pending.push(address.child(id));
                }
            }
        }
        Ok(tree)
    }
}

/// Every address reachable in either tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeWalk {
    /// Ancestor addresses, parents before children.
    pub ancestors: Vec<Address>,
    /// Leaf addresses.
    pub leaves: Vec<Address>,
}

/// A data and meta connector of the same depth, viewed as one tree.
#[derive(Clone)]
pub struct Connectors {
    data: Arc<dyn DataConnector>,
    meta: Arc<dyn MetaConnector>,
    depth: usize,
}

impl Connectors {
    pub fn new(data: Arc<dyn DataConnector>, meta: Arc<dyn MetaConnector>) -> Result<Self> {
        let depth = data.depth();
        if meta.depth() != depth {
            return Err(ConnectorError::DepthMismatch {
                data: depth,
                meta: meta.depth(),
            });
        }
        Ok(Self { data, meta, depth })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn data(&self) -> &Arc<dyn DataConnector> {
        &self.data
    }

    pub fn meta(&self) -> &Arc<dyn MetaConnector> {
        &self.meta
    }

    pub fn is_leaf(&self, address: &Address) -> bool {
        address.len() == self.depth
    }

    /// Timestamp and value of a leaf.
    ///
    /// A leaf with a timestamp but no stored value reads as a tombstone. A
    /// value without a timestamp reads as absent: it has never been stamped.
    pub async fn read_leaf(&self, address: &Address) -> Result<Option<(Timestamp, Value)>> {
        let Some(timestamp) = self.meta.read_timestamp(address).await? else {
            return Ok(None);
        };
        let value = self.data.read_value(address).await?.unwrap_or(Value::Tombstone);
        Ok(Some((timestamp, value)))
    }

    pub async fn write_leaf(&self, address: &Address, timestamp: &Timestamp, value: &Value) -> Result<()> {
        self.check_leaf(address)?;
        self.data.write_value(address, value).await?;
        self.meta.write_timestamp(address, timestamp).await
    }

    pub async fn read_hash(&self, address: &Address) -> Result<Option<Hash>> {
        self.meta.read_hash(address).await
    }

    pub async fn write_hash(&self, address: &Address, hash: Hash) -> Result<()> {
        if address.len() >= self.depth {
            return Err(ConnectorError::InvalidAddress {
                address: address.clone(),
                depth: self.depth,
            });
        }
        self.meta.write_hash(address, hash).await
    }

    /// Children known to either tree, sorted.
    pub async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        let mut ids: BTreeSet<String> = self.data.read_child_ids(address).await?.into_iter().collect();
        ids.extend(self.meta.read_child_ids(address).await?);
        Ok(ids.into_iter().collect())
    }

    pub async fn get_data(&self) -> Result<DataNode> {
        self.data.get_data().await
    }

    pub async fn get_meta(&self) -> Result<MetaNode> {
        self.meta.get_meta().await
    }

    /// Enumerate every ancestor and leaf address present in either tree.
    pub async fn walk(&self) -> Result<TreeWalk> {
        let mut walk = TreeWalk::default();
        let mut pending = vec![Address::root()];
        while let Some(address) = pending.pop() {
            if self.is_leaf(&address) {
                walk.leaves.push(address);
                continue;
            }
            for id in self.read_child_ids(&address).await?.into_iter().rev() {
                pending.push(address.child(id));
            }
            walk.ancestors.push(address);
        }
        Ok(walk)
    }

    fn check_leaf(&self, address: &Address) -> Result<()> {
        if self.is_leaf(address) {
            Ok(())
        } else {
            Err(ConnectorError::InvalidAddress {
                address: address.clone(),
                depth: self.depth,
            })
        }
    }
}
