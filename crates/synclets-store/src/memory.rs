//! In-memory connectors.
//!
//! Primarily for tests and for Synclets whose state is rebuilt from peers on
//! every start. All data is lost when the connector is dropped.

use std::sync::RwLock;

use async_trait::async_trait;

use synclets_core::{Address, DataNode, Hash, MetaNode, Timestamp, Value};

use crate::error::{ConnectorError, Result};
use crate::traits::{Attachment, ChangeNotifier, ChangeSender, DataConnector, MetaConnector};

/// In-memory data connector.
pub struct MemoryDataConnector {
    depth: usize,
    attachment: Attachment,
    notifier: ChangeNotifier,
    tree: RwLock<DataNode>,
}

impl MemoryDataConnector {
    /// Create an empty connector.
    pub fn new(depth: usize) -> Self {
        Self::with_data(depth, DataNode::default())
    }

    /// Create a connector holding pre-existing content.
    pub fn with_data(depth: usize, tree: DataNode) -> Self {
        Self {
            depth,
            attachment: Attachment::new(),
            notifier: ChangeNotifier::default(),
            tree: RwLock::new(tree),
        }
    }

    /// Change a value as an application sharing this store would, bypassing
    /// the Synclet. The owning Synclet is told through the change channel.
    pub fn external_set(&self, address: &Address, value: Value) -> Result<()> {
        self.check_leaf(address)?;
        self.tree.write()?.set_value(address.ids(), value);
        if !self.notifier.notify(address.clone())? {
            tracing::debug!(%address, "external change held until a synclet connects");
        }
        Ok(())
    }

    /// Delete a value from outside the Synclet.
    pub fn external_delete(&self, address: &Address) -> Result<()> {
        self.external_set(address, Value::Tombstone)
    }

    fn check_leaf(&self, address: &Address) -> Result<()> {
        if address.len() == self.depth {
            Ok(())
        } else {
            Err(ConnectorError::InvalidAddress {
                address: address.clone(),
                depth: self.depth,
            })
        }
    }
}

#[async_trait]
impl DataConnector for MemoryDataConnector {
    fn depth(&self) -> usize {
        self.depth
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn connect(&self, changes: ChangeSender) -> Result<()> {
        self.notifier.register(changes)
    }

    async fn disconnect(&self) -> Result<()> {
        self.notifier.unregister()
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        Ok(self.tree.read()?.child_ids(address.ids()))
    }

    async fn read_value(&self, address: &Address) -> Result<Option<Value>> {
        Ok(self.tree.read()?.value(address.ids()).cloned())
    }

    async fn write_value(&self, address: &Address, value: &Value) -> Result<()> {
        self.check_leaf(address)?;
        self.tree.write()?.set_value(address.ids(), value.clone());
        Ok(())
    }

    async fn get_data(&self) -> Result<DataNode> {
        Ok(self.tree.read()?.clone())
    }
}

/// In-memory meta connector.
pub struct MemoryMetaConnector {
    depth: usize,
    attachment: Attachment,
    tree: RwLock<MetaNode>,
}

impl MemoryMetaConnector {
    pub fn new(depth: usize) -> Self {
        Self::with_meta(depth, MetaNode::default())
    }

    pub fn with_meta(depth: usize, tree: MetaNode) -> Self {
        Self {
            depth,
            attachment: Attachment::new(),
            tree: RwLock::new(tree),
        }
    }
}

#[async_trait]
impl MetaConnector for MemoryMetaConnector {
    fn depth(&self) -> usize {
        self.depth
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        Ok(self.tree.read()?.child_ids(address.ids()))
    }

    async fn read_timestamp(&self, address: &Address) -> Result<Option<Timestamp>> {
        Ok(self.tree.read()?.timestamp(address.ids()).cloned())
    }

    async fn write_timestamp(&self, address: &Address, timestamp: &Timestamp) -> Result<()> {
        if address.len() != self.depth {
            return Err(ConnectorError::InvalidAddress {
                address: address.clone(),
                depth: self.depth,
            });
        }
        self.tree.write()?.set_timestamp(address.ids(), timestamp.clone());
        Ok(())
    }

    async fn read_hash(&self, address: &Address) -> Result<Option<Hash>> {
        Ok(self.tree.read()?.hash(address.ids()))
    }

    async fn write_hash(&self, address: &Address, hash: Hash) -> Result<()> {
        if address.len() >= self.depth {
            return Err(ConnectorError::InvalidAddress {
                address: address.clone(),
                depth: self.depth,
            });
        }
        self.tree.write()?.set_hash(address.ids(), hash);
        Ok(())
    }

    async fn get_meta(&self) -> Result<MetaNode> {
        Ok(self.tree.read()?.clone())
    }
}
