//! Behaviour when transports or connectors fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use synclets::core::{encode_hlc, Hash, Message, MessageNode};
use synclets::store::{Attachment, ConnectorError};
use synclets::sync::{fragment, PacketSender, SyncError};
use synclets::{
    Address, MemoryBus, MemoryDataConnector, MemoryMetaConnector, MetaConnector, Status, Synclet,
    SyncletConfig, SyncletError, Timestamp, Transport, Value,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// A transport that accepts injected inbound packets but can never send.
#[derive(Default)]
struct OneWayTransport {
    attachment: Attachment,
    refuse_connect: bool,
    inbound: Mutex<Option<PacketSender>>,
}

impl OneWayTransport {
    fn refusing() -> Self {
        Self {
            refuse_connect: true,
            ..Default::default()
        }
    }

    fn deliver(&self, message: &Message) {
        let guard = self.inbound.lock().unwrap();
        let inbound = guard.as_ref().expect("transport not connected");
        for packet in fragment(message, self.fragment_size()).unwrap() {
            inbound.send(packet).unwrap();
        }
    }
}

#[async_trait]
impl Transport for OneWayTransport {
    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn connect(&self, packets: PacketSender) -> synclets::sync::Result<()> {
        if self.refuse_connect {
            return Err(SyncError::Transport("connection refused".into()));
        }
        *self.inbound.lock().unwrap() = Some(packets);
        Ok(())
    }

    async fn disconnect(&self) -> synclets::sync::Result<()> {
        self.inbound.lock().unwrap().take();
        Ok(())
    }

    async fn send_packet(&self, _packet: String) -> synclets::sync::Result<()> {
        Err(SyncError::Transport("peer unreachable".into()))
    }
}

/// Memory meta connector whose `connect` can be made to fail.
struct FlakyMeta {
    inner: MemoryMetaConnector,
    fail: AtomicBool,
}

impl FlakyMeta {
    fn failing(depth: usize) -> Self {
        Self {
            inner: MemoryMetaConnector::new(depth),
            fail: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl MetaConnector for FlakyMeta {
    fn depth(&self) -> usize {
        self.inner.depth()
    }

    fn attachment(&self) -> &Attachment {
        self.inner.attachment()
    }

    async fn connect(&self) -> synclets::store::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectorError::Backend("meta store offline".into()));
        }
        self.inner.connect().await
    }

    async fn disconnect(&self) -> synclets::store::Result<()> {
        self.inner.disconnect().await
    }

    async fn read_child_ids(&self, address: &Address) -> synclets::store::Result<Vec<String>> {
        self.inner.read_child_ids(address).await
    }

    async fn read_timestamp(&self, address: &Address) -> synclets::store::Result<Option<Timestamp>> {
        self.inner.read_timestamp(address).await
    }

    async fn write_timestamp(&self, address: &Address, timestamp: &Timestamp) -> synclets::store::Result<()> {
        self.inner.write_timestamp(address, timestamp).await
    }

    async fn read_hash(&self, address: &Address) -> synclets::store::Result<Option<Hash>> {
        self.inner.read_hash(address).await
    }

    async fn write_hash(&self, address: &Address, hash: Hash) -> synclets::store::Result<()> {
        self.inner.write_hash(address, hash).await
    }
}

async fn wait_for_value(synclet: &Synclet, address: &Address, expected: Value) {
    tokio::time::timeout(TIMEOUT, async {
        while synclet.get_value(address).await.unwrap().as_ref() != Some(&expected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never became {:?}", address, expected));
}

#[tokio::test]
async fn test_failed_reply_still_propagates_changes() {
    let bus = MemoryBus::new();
    let one_way = Arc::new(OneWayTransport::default());
    let a = Synclet::builder(SyncletConfig::with_depth(1))
        .transport(one_way.clone())
        .transport(Arc::new(bus.transport()))
        .build()
        .unwrap();
    let c = Synclet::builder(SyncletConfig::with_depth(1))
        .transport(Arc::new(bus.transport()))
        .build()
        .unwrap();

    a.set_value(&Address::new(["own"]), "a").await.unwrap();
    c.start().await.unwrap();
    match a.start().await {
        Err(SyncletError::TransportsFailed(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 0);
        }
        other => panic!("expected TransportsFailed, got {:?}", other),
    }
    wait_for_value(&c, &Address::new(["own"]), Value::from("a")).await;

    // A new leaf plus a root hash that cannot match: applying the leaf
    // produces changes, and the mismatch produces a reply that cannot be sent.
    let remote: Hash = 1;
    let message = Message::new(vec![
        MessageNode::Leaf {
            address: Address::new(["k"]),
            timestamp: encode_hlc(1_700_000_000_000, 0, "zzzzz"),
            value: Value::from("remote"),
        },
        MessageNode::Ancestor {
            address: Address::root(),
            hash: remote,
        },
    ]);
    one_way.deliver(&message);

    wait_for_value(&a, &Address::new(["k"]), Value::from("remote")).await;
    wait_for_value(&c, &Address::new(["k"]), Value::from("remote")).await;
}

#[tokio::test]
async fn test_partial_transport_failure_on_start() {
    let bus = MemoryBus::new();
    let refusing = Arc::new(OneWayTransport::refusing());
    let a = Synclet::builder(SyncletConfig::with_depth(1))
        .transport(refusing.clone())
        .transport(Arc::new(bus.transport()))
        .build()
        .unwrap();
    let b = Synclet::builder(SyncletConfig::with_depth(1))
        .transport(Arc::new(bus.transport()))
        .build()
        .unwrap();
    b.start().await.unwrap();

    match a.start().await {
        Err(SyncletError::TransportsFailed(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 0);
            assert!(matches!(failures[0].error, SyncError::Transport(_)));
        }
        other => panic!("expected TransportsFailed, got {:?}", other),
    }
    assert_eq!(a.status().await, Status::Started);
    assert_eq!(bus.connected_count().await, 2);
    assert!(refusing.attachment().is_claimed());

    a.set_value(&Address::new(["k"]), "v").await.unwrap();
    wait_for_value(&b, &Address::new(["k"]), Value::from("v")).await;

    a.stop().await.unwrap();
    assert_eq!(a.status().await, Status::Stopped);
}

#[tokio::test]
async fn test_meta_connect_failure_rolls_back() {
    let bus = MemoryBus::new();
    let data = Arc::new(MemoryDataConnector::new(1));
    let meta = Arc::new(FlakyMeta::failing(1));
    let a = Synclet::builder(SyncletConfig::with_depth(1))
        .data_connector(data.clone())
        .meta_connector(meta.clone())
        .transport(Arc::new(bus.transport()))
        .build()
        .unwrap();

    match a.start().await {
        Err(SyncletError::Connector(ConnectorError::Backend(_))) => {}
        other => panic!("expected a connector error, got {:?}", other),
    }
    assert_eq!(a.status().await, Status::Created);
    assert_eq!(bus.connected_count().await, 0);

    // The data connector was disconnected again; this change waits for the
    // next successful start.
    let leaf = Address::new(["k"]);
    data.external_set(&leaf, Value::from("x")).unwrap();

    meta.fail.store(false, Ordering::SeqCst);
    a.start().await.unwrap();
    assert_eq!(a.status().await, Status::Started);
    assert_eq!(bus.connected_count().await, 1);

    tokio::time::timeout(TIMEOUT, async {
        while a.get_timestamp(&leaf).await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("external change was never stamped");
}
