//! Packet layer: fragmentation and reassembly of messages.
//!
//! A serialized [`Message`] is cut into fragments small enough for the
//! transport, each sent as a packet of the form
//!
//! ```text
//! <message_id> <index> <total> <fragment>
//! ```
//!
//! The receiving side buffers fragments per message id and delivers the
//! message only once all `total` fragments have arrived, in any order.
//! Malformed packets are dropped. Incomplete buffers live until
//! [`Reassembler::clear`] is called on disconnect. Ids of recently completed
//! messages are remembered so a late duplicate fragment is dropped instead of
//! opening a buffer that can never complete.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use synclets_core::codec::random_id;
use synclets_core::Message;

use crate::error::{Result, SyncError};

/// Bytes reserved in every packet for the header.
pub const HEADER_BUDGET: usize = 32;

/// Fragment size used when a transport does not configure one.
pub const DEFAULT_FRAGMENT_SIZE: usize = 4096;

/// Length of generated message ids.
pub const MESSAGE_ID_LENGTH: usize = 8;

/// Check that a transport's fragment size leaves room for the header.
pub fn validate_fragment_size(fragment_size: usize) -> Result<()> {
    if fragment_size < HEADER_BUDGET {
        return Err(SyncError::InvalidFragmentSize {
            size: fragment_size,
            min: HEADER_BUDGET,
        });
    }
    Ok(())
}

/// Serialize `message` and split it into packets for a transport with the
/// given fragment size.
pub fn fragment(message: &Message, fragment_size: usize) -> Result<Vec<String>> {
    validate_fragment_size(fragment_size)?;
    let serialized = message.to_json()?;
    Ok(fragment_str(
        &random_id(MESSAGE_ID_LENGTH),
        &serialized,
        fragment_size,
    ))
}

/// Split an already-serialized message into packets under `message_id`.
pub fn fragment_str(message_id: &str, serialized: &str, fragment_size: usize) -> Vec<String> {
    let payload = fragment_size.saturating_sub(HEADER_BUDGET).max(1);
    let pieces = split_on_char_boundaries(serialized, payload);
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| format!("{} {} {} {}", message_id, index, total, piece))
        .collect()
}

fn split_on_char_boundaries(s: &str, max_bytes: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < s.len() {
        let mut end = (start + max_bytes).min(s.len());
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character wider than the payload travels alone.
            end = start + s[start..].chars().next().map_or(1, char::len_utf8);
        }
        pieces.push(&s[start..end]);
        start = end;
    }
    if pieces.is_empty() {
        pieces.push("");
    }
    pieces
}

/// A parsed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    pub message_id: &'a str,
    pub index: usize,
    pub total: usize,
    pub fragment: &'a str,
}

impl<'a> Packet<'a> {
    /// Parse a raw packet, returning `None` if it does not match the packet form.
    pub fn parse(raw: &'a str) -> Option<Self> {
        let mut parts = raw.splitn(4, ' ');
        let message_id = parts.next().filter(|id| !id.is_empty())?;
        let index = parse_count(parts.next()?)?;
        let total = parse_count(parts.next()?)?;
        let fragment = parts.next()?;
        if total == 0 || index >= total {
            return None;
        }
        Some(Self {
            message_id,
            index,
            total,
            fragment,
        })
    }
}

fn parse_count(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[derive(Debug)]
struct Pending {
    total: usize,
    fragments: BTreeMap<usize, String>,
}

/// How many completed message ids a [`Reassembler`] remembers.
const COMPLETED_HISTORY: usize = 256;

/// Per-transport buffer of incomplete messages.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<String, Pending>,
    completed: VecDeque<String>,
    completed_ids: HashSet<String>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw packet. Returns the message it completes, if any.
    pub fn receive(&mut self, raw: &str) -> Option<Message> {
        let Some(packet) = Packet::parse(raw) else {
            tracing::debug!(len = raw.len(), "dropping malformed packet");
            return None;
        };
        if self.completed_ids.contains(packet.message_id) {
            tracing::trace!(message_id = packet.message_id, "dropping fragment of completed message");
            return None;
        }

        let pending = self
            .pending
            .entry(packet.message_id.to_string())
            .or_insert_with(|| Pending {
                total: packet.total,
                fragments: BTreeMap::new(),
            });
        if pending.total != packet.total {
            tracing::debug!(
                message_id = packet.message_id,
                expected = pending.total,
                got = packet.total,
                "dropping fragment with inconsistent total"
            );
            return None;
        }
        pending
            .fragments
            .insert(packet.index, packet.fragment.to_string());
        if pending.fragments.len() < pending.total {
            return None;
        }

        let pending = self.pending.remove(packet.message_id)?;
        self.remember_completed(packet.message_id);
        let serialized: String = pending.fragments.into_values().collect();
        match Message::from_json(&serialized) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(
                    message_id = packet.message_id,
                    error = %e,
                    "discarding undecodable message"
                );
                None
            }
        }
    }

    /// Number of messages still waiting for fragments.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Discard every incomplete message.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.completed.clear();
        self.completed_ids.clear();
    }

    fn remember_completed(&mut self, message_id: &str) {
        if self.completed.len() >= COMPLETED_HISTORY {
            if let Some(oldest) = self.completed.pop_front() {
                self.completed_ids.remove(&oldest);
            }
        }
        self.completed.push_back(message_id.to_string());
        self.completed_ids.insert(message_id.to_string());
    }
}
