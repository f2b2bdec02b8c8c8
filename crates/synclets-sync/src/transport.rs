//! Transport abstraction.
//!
//! A transport moves opaque packet strings between Synclets. It does not
//! need to understand the packet format, only to deliver strings byte for
//! byte. Inbound packets are pushed into the channel handed to
//! [`Transport::connect`]; after [`Transport::disconnect`] returns, nothing
//! more is pushed into it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use synclets_core::Message;
use synclets_store::Attachment;

use crate::error::Result;
use crate::packet::{fragment, DEFAULT_FRAGMENT_SIZE};

/// Channel on which a transport delivers inbound packets.
pub type PacketSender = mpsc::UnboundedSender<String>;
pub type PacketReceiver = mpsc::UnboundedReceiver<String>;

/// Packet delivery channel between Synclets.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Largest packet this transport carries, header included.
    fn fragment_size(&self) -> usize {
        DEFAULT_FRAGMENT_SIZE
    }

    /// Ownership claim for this transport.
    fn attachment(&self) -> &Attachment;

    /// Start delivering inbound packets to `packets`.
    async fn connect(&self, packets: PacketSender) -> Result<()>;

    /// Stop delivering packets and release the channel.
    async fn disconnect(&self) -> Result<()>;

    /// Send one packet to the peer(s) on the other side.
    async fn send_packet(&self, packet: String) -> Result<()>;
}

/// Fragment `message` for `transport` and send every packet.
///
/// Returns the number of packets sent.
pub async fn send_message(transport: &dyn Transport, message: &Message) -> Result<usize> {
    let packets = fragment(message, transport.fragment_size())?;
    let count = packets.len();
    for packet in packets {
        transport.send_packet(packet).await?;
    }
    Ok(count)
}

/// In-process transports for tests and for Synclets sharing one process.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::{Mutex, RwLock};
    use tokio::task::JoinHandle;

    use synclets_core::codec::random_id;

    use crate::envelope::{self, BROADCAST};
    use crate::error::SyncError;

    /// A shared in-process medium. Every packet sent by one member is
    /// delivered to every other connected member.
    ///
    /// Two members make a point-to-point link; more make a pool.
    #[derive(Default)]
    pub struct MemoryBus {
        members: RwLock<HashMap<u64, PacketSender>>,
        next_member: AtomicU64,
    }

    impl MemoryBus {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a member transport with the default fragment size.
        pub fn transport(self: &Arc<Self>) -> BusTransport {
            self.transport_with_fragment_size(DEFAULT_FRAGMENT_SIZE)
        }

        pub fn transport_with_fragment_size(self: &Arc<Self>, fragment_size: usize) -> BusTransport {
            BusTransport {
                member: self.next_member.fetch_add(1, Ordering::SeqCst),
                bus: Arc::clone(self),
                fragment_size,
                attachment: Attachment::new(),
            }
        }

        /// Number of currently connected members.
        pub async fn connected_count(&self) -> usize {
            self.members.read().await.len()
        }
    }

    /// One member of a [`MemoryBus`].
    pub struct BusTransport {
        member: u64,
        bus: Arc<MemoryBus>,
        fragment_size: usize,
        attachment: Attachment,
    }

    #[async_trait]
    impl Transport for BusTransport {
        fn fragment_size(&self) -> usize {
            self.fragment_size
        }

        fn attachment(&self) -> &Attachment {
            &self.attachment
        }

        async fn connect(&self, packets: PacketSender) -> Result<()> {
            self.bus.members.write().await.insert(self.member, packets);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.bus.members.write().await.remove(&self.member);
            Ok(())
        }

        async fn send_packet(&self, packet: String) -> Result<()> {
            let members = self.bus.members.read().await;
            if !members.contains_key(&self.member) {
                return Err(SyncError::NotConnected);
            }
            for (member, sender) in members.iter() {
                if *member != self.member {
                    // A member whose receiver is gone is about to disconnect.
                    let _ = sender.send(packet.clone());
                }
            }
            Ok(())
        }
    }

    /// A relay multiplexing many peers over one channel, as a WebSocket
    /// server would. Packets are routed by their envelope.
    #[derive(Default)]
    pub struct MemoryBroker {
        clients: RwLock<HashMap<String, PacketSender>>,
    }

    impl MemoryBroker {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a client transport with a fresh peer id.
        pub fn transport(self: &Arc<Self>) -> BrokerTransport {
            self.transport_with_fragment_size(DEFAULT_FRAGMENT_SIZE)
        }

        pub fn transport_with_fragment_size(self: &Arc<Self>, fragment_size: usize) -> BrokerTransport {
            BrokerTransport {
                peer_id: random_id(8),
                broker: Arc::clone(self),
                fragment_size,
                attachment: Attachment::new(),
                forwarder: Mutex::new(None),
            }
        }

        /// Ids of the connected clients.
        pub async fn peer_ids(&self) -> Vec<String> {
            let mut ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
            ids.sort();
            ids
        }

        async fn join(&self, peer_id: &str, sender: PacketSender) -> Result<()> {
            let mut clients = self.clients.write().await;
            if clients.contains_key(peer_id) {
                return Err(SyncError::Transport(format!(
                    "peer {} already connected to broker",
                    peer_id
                )));
            }
            clients.insert(peer_id.to_string(), sender);
            Ok(())
        }

        async fn leave(&self, peer_id: &str) {
            self.clients.write().await.remove(peer_id);
        }

        /// Route an envelope sent by `from`. The recipient sees the body
        /// wrapped with the sender's id.
        pub async fn route(&self, from: &str, envelope: &str) {
            let Some((to, body)) = envelope::unwrap(envelope) else {
                tracing::debug!(from, "broker dropping packet without envelope");
                return;
            };
            let forwarded = envelope::wrap(from, body);
            let clients = self.clients.read().await;
            if to == BROADCAST {
                for (peer_id, sender) in clients.iter() {
                    if peer_id != from {
                        let _ = sender.send(forwarded.clone());
                    }
                }
            } else if let Some(sender) = clients.get(to) {
                let _ = sender.send(forwarded);
            } else {
                tracing::debug!(from, to, "broker dropping packet for unknown peer");
            }
        }
    }

    /// A client of a [`MemoryBroker`]. Broadcasts every packet and strips
    /// the envelope from inbound ones.
    pub struct BrokerTransport {
        peer_id: String,
        broker: Arc<MemoryBroker>,
        fragment_size: usize,
        attachment: Attachment,
        forwarder: Mutex<Option<JoinHandle<()>>>,
    }

    impl BrokerTransport {
        pub fn peer_id(&self) -> &str {
            &self.peer_id
        }
    }

    #[async_trait]
    impl Transport for BrokerTransport {
        fn fragment_size(&self) -> usize {
            self.fragment_size
        }

        fn attachment(&self) -> &Attachment {
            &self.attachment
        }

        async fn connect(&self, packets: PacketSender) -> Result<()> {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            self.broker.join(&self.peer_id, tx).await?;

            let peer_id = self.peer_id.clone();
            let task = tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    match envelope::unwrap(&envelope) {
                        Some((_from, body)) => {
                            if packets.send(body.to_string()).is_err() {
                                break;
                            }
                        }
                        None => tracing::debug!(peer_id = %peer_id, "dropping packet without envelope"),
                    }
                }
            });
            if let Some(previous) = self.forwarder.lock().await.replace(task) {
                previous.abort();
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.broker.leave(&self.peer_id).await;
            let forwarder = self.forwarder.lock().await.take();
            if let Some(task) = forwarder {
                task.abort();
                // Wait for the task to drop its sender so nothing is
                // delivered after this returns.
                let _ = task.await;
            }
            Ok(())
        }

        async fn send_packet(&self, packet: String) -> Result<()> {
            if !self.broker.clients.read().await.contains_key(&self.peer_id) {
                return Err(SyncError::NotConnected);
            }
            self.broker
                .route(&self.peer_id, &envelope::wrap(BROADCAST, &packet))
                .await;
            Ok(())
        }
    }
}
