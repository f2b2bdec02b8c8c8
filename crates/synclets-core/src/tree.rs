//! Snapshots of the data tree and the parallel metadata tree.
//!
//! Both are plain recursive maps ordered by id, so two replicas that hold the
//! same content produce equal snapshots. An empty tree is an empty branch
//! whatever the depth.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Address, Hash, Timestamp, Value};

/// A node of the data tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataNode {
    Branch(BTreeMap<String, DataNode>),
    Leaf(Value),
}

impl Default for DataNode {
    fn default() -> Self {
        DataNode::Branch(BTreeMap::new())
    }
}

impl DataNode {
    /// The node at `ids`, relative to this one.
    pub fn get(&self, ids: &[String]) -> Option<&DataNode> {
        match ids.split_first() {
            None => Some(self),
            Some((first, rest)) => match self {
                DataNode::Branch(children) => children.get(first)?.get(rest),
                DataNode::Leaf(_) => None,
            },
        }
    }

    /// The value of the leaf at `ids`.
    pub fn value(&self, ids: &[String]) -> Option<&Value> {
        match self.get(ids)? {
            DataNode::Leaf(value) => Some(value),
            DataNode::Branch(_) => None,
        }
    }

    /// Ids of the immediate children of the branch at `ids`.
    pub fn child_ids(&self, ids: &[String]) -> Vec<String> {
        match self.get(ids) {
            Some(DataNode::Branch(children)) => children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Store `value` at `ids`, materializing intermediate branches.
    pub fn set_value(&mut self, ids: &[String], value: Value) {
        match ids.split_first() {
            None => *self = DataNode::Leaf(value),
            Some((first, rest)) => {
                if let DataNode::Leaf(_) = self {
                    *self = DataNode::default();
                }
                if let DataNode::Branch(children) = self {
                    children.entry(first.clone()).or_default().set_value(rest, value);
                }
            }
        }
    }

    /// Every leaf with its absolute address, in id order.
    pub fn leaves(&self) -> Vec<(Address, &Value)> {
        let mut out = Vec::new();
        self.collect_leaves(Address::root(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, at: Address, out: &mut Vec<(Address, &'a Value)>) {
        match self {
            DataNode::Leaf(value) => out.push((at, value)),
            DataNode::Branch(children) => {
                for (id, child) in children {
                    child.collect_leaves(at.child(id.clone()), out);
                }
            }
        }
    }
}

/// A node of the metadata tree: ancestor hashes and leaf timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaNode {
    Branch {
        hash: Hash,
        children: BTreeMap<String, MetaNode>,
    },
    Leaf(Timestamp),
}

impl Default for MetaNode {
    fn default() -> Self {
        MetaNode::Branch {
            hash: 0,
            children: BTreeMap::new(),
        }
    }
}

impl MetaNode {
    pub fn get(&self, ids: &[String]) -> Option<&MetaNode> {
        match ids.split_first() {
            None => Some(self),
            Some((first, rest)) => match self {
                MetaNode::Branch { children, .. } => children.get(first)?.get(rest),
                MetaNode::Leaf(_) => None,
            },
        }
    }

    pub fn timestamp(&self, ids: &[String]) -> Option<&Timestamp> {
        match self.get(ids)? {
            MetaNode::Leaf(timestamp) => Some(timestamp),
            MetaNode::Branch { .. } => None,
        }
    }

    pub fn hash(&self, ids: &[String]) -> Option<Hash> {
        match self.get(ids)? {
            MetaNode::Branch { hash, .. } => Some(*hash),
            MetaNode::Leaf(_) => None,
        }
    }

    pub fn child_ids(&self, ids: &[String]) -> Vec<String> {
        match self.get(ids) {
            Some(MetaNode::Branch { children, .. }) => children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Store a leaf timestamp, materializing intermediate branches.
    pub fn set_timestamp(&mut self, ids: &[String], timestamp: Timestamp) {
        match ids.split_first() {
            None => *self = MetaNode::Leaf(timestamp),
            Some((first, rest)) => self
                .branch_children()
                .entry(first.clone())
                .or_default()
                .set_timestamp(rest, timestamp),
        }
    }

    /// Store an ancestor hash, materializing intermediate branches.
    pub fn set_hash(&mut self, ids: &[String], new_hash: Hash) {
        match ids.split_first() {
            None => {
                if let MetaNode::Leaf(_) = self {
                    *self = MetaNode::default();
                }
                if let MetaNode::Branch { hash, .. } = self {
                    *hash = new_hash;
                }
            }
            Some((first, rest)) => self
                .branch_children()
                .entry(first.clone())
                .or_default()
                .set_hash(rest, new_hash),
        }
    }

    fn branch_children(&mut self) -> &mut BTreeMap<String, MetaNode> {
        if let MetaNode::Leaf(_) = self {
            *self = MetaNode::default();
        }
        match self {
            MetaNode::Branch { children, .. } => children,
            MetaNode::Leaf(_) => unreachable!("leaf replaced by a branch above"),
        }
    }
}
