//! Routing envelope for broker transports.
//!
//! A broker multiplexes several peers over one channel. Packets travelling
//! through it are wrapped as `"<to_or_from> <body>"`: outbound from a client
//! the first field names the recipient (or [`BROADCAST`]), inbound to a
//! client it names the sender. Point-to-point transports never see it.

/// Recipient marker meaning "every other peer".
pub const BROADCAST: &str = "*";

/// Wrap a packet for `peer`.
pub fn wrap(peer: &str, body: &str) -> String {
    format!("{} {}", peer, body)
}

/// Split an envelope into its peer field and body.
pub fn unwrap(envelope: &str) -> Option<(&str, &str)> {
    let (peer, body) = envelope.split_once(' ')?;
    if peer.is_empty() {
        return None;
    }
    Some((peer, body))
}
