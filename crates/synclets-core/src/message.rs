//! Reconciliation message types.
//!
//! A [`Message`] is what the reconciler exchanges before packet
//! fragmentation. Each [`MessageNode`] describes one address of the sender's
//! tree: an ancestor by its hash, a leaf by its timestamp and value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Address, Hash, Timestamp, Value};

/// Opaque metadata attached to a message, inspected only by hooks.
pub type Context = BTreeMap<String, Value>;

/// One entry of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageNode {
    Ancestor {
        address: Address,
        hash: Hash,
    },
    Leaf {
        address: Address,
        timestamp: Timestamp,
        value: Value,
    },
}

impl MessageNode {
    pub fn address(&self) -> &Address {
        match self {
            MessageNode::Ancestor { address, .. } | MessageNode::Leaf { address, .. } => address,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, MessageNode::Leaf { .. })
    }
}

/// An ordered list of nodes plus optional context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub nodes: Vec<MessageNode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: Context,
}

impl Message {
    pub fn new(nodes: Vec<MessageNode>) -> Self {
        Self {
            nodes,
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize to the string carried by packets.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
