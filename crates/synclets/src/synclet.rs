//! The Synclet: one replica of a tree, its storage and its transports.
//!
//! A Synclet owns a data connector, a meta connector and any number of
//! transports. It turns local writes into timestamped leaves, feeds inbound
//! messages to the reconciler and pushes whatever changed to its peers.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --start--> Started --stop--> Stopped --start--> Started
//!    \                   \                 \
//!     +----------------- destroy ----------+--> Destroyed
//! ```
//!
//! Every mutation (local write, external change, inbound message) runs while
//! holding the clock lock, so the write and its hash-chain update are never
//! interleaved with another mutation or observed half done.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use synclets_core::codec::random_id;
use synclets_core::{
    Address, Clock, Context, DataNode, Message, MessageNode, MetaNode, SystemTimeSource,
    TimeSource, Timestamp, Value,
};
use synclets_store::{
    Attachment, ChangeReceiver, Connectors, DataConnector, MemoryDataConnector,
    MemoryMetaConnector, MetaConnector,
};
use synclets_sync::{
    send_message, validate_fragment_size, PacketReceiver, Reassembler, Reconciler, SyncError,
    Transport,
};

use crate::error::{Result, SyncletError, TransportFailure};

/// Length of generated unique ids.
const UNIQUE_ID_LENGTH: usize = 16;

/// Lifecycle state of a Synclet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    Started,
    Stopped,
    Destroyed,
}

/// Application hooks consulted on every message.
///
/// All methods have permissive defaults.
pub trait SyncletHooks: Send + Sync {
    /// Whether an inbound message with this context may be applied.
    fn can_receive_message(&self, _context: &Context) -> bool {
        true
    }

    /// Whether an outbound message with this context may be sent.
    fn can_send_message(&self, _context: &Context) -> bool {
        true
    }

    /// Extra context for a message about `address`.
    fn send_context(&self, _address: &Address) -> Context {
        Context::new()
    }
}

/// Hooks that allow everything and add nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl SyncletHooks for DefaultHooks {}

/// Configuration for a Synclet.
#[derive(Debug, Clone, Default)]
pub struct SyncletConfig {
    /// Length of every leaf address.
    pub depth: usize,
    /// Seed for the client id embedded in timestamps. Random when absent.
    pub unique_id: Option<String>,
    /// Context attached to every outbound message.
    pub send_context: Context,
}

impl SyncletConfig {
    pub fn with_depth(depth: usize) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }
}

/// Builder for [`Synclet`].
///
/// Connectors default to in-memory ones of the configured depth.
pub struct SyncletBuilder {
    config: SyncletConfig,
    data: Option<Arc<dyn DataConnector>>,
    meta: Option<Arc<dyn MetaConnector>>,
    transports: Vec<Arc<dyn Transport>>,
    hooks: Arc<dyn SyncletHooks>,
    time: Arc<dyn TimeSource>,
}

impl SyncletBuilder {
    pub fn new(config: SyncletConfig) -> Self {
        Self {
            config,
            data: None,
            meta: None,
            transports: Vec::new(),
            hooks: Arc::new(DefaultHooks),
            time: Arc::new(SystemTimeSource),
        }
    }

    pub fn data_connector(mut self, data: Arc<dyn DataConnector>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn meta_connector(mut self, meta: Arc<dyn MetaConnector>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn SyncletHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Validate the parts and claim them for a new Synclet.
    pub fn build(self) -> Result<Synclet> {
        let depth = self.config.depth;
        let data: Arc<dyn DataConnector> = match self.data {
            Some(data) => data,
            None => Arc::new(MemoryDataConnector::new(depth)),
        };
        let meta: Arc<dyn MetaConnector> = match self.meta {
            Some(meta) => meta,
            None => Arc::new(MemoryMetaConnector::new(depth)),
        };

        let depths = [
            ("data connector", data.depth()),
            ("meta connector", meta.depth()),
        ];
        for (component, actual) in depths {
            if actual != depth {
                return Err(SyncletError::DepthMismatch {
                    expected: depth,
                    component,
                    actual,
                });
            }
        }
        for transport in &self.transports {
            validate_fragment_size(transport.fragment_size())?;
        }

        let connectors = Connectors::new(data, meta)?;
        claim_all(&connectors, &self.transports)?;

        let unique_id = self
            .config
            .unique_id
            .clone()
            .unwrap_or_else(|| random_id(UNIQUE_ID_LENGTH));
        let clock = Clock::new(&unique_id, self.time);
        let client_id = clock.client_id().to_string();
        tracing::debug!(%client_id, depth, transports = self.transports.len(), "synclet created");

        Ok(Synclet {
            inner: Arc::new(Inner {
                config: self.config,
                client_id,
                reconciler: Reconciler::new(connectors),
                transports: self.transports,
                hooks: self.hooks,
                clock: Mutex::new(clock),
                lifecycle: Mutex::new(()),
                state: Mutex::new(State {
                    status: Status::Created,
                    connected: Vec::new(),
                    tasks: Vec::new(),
                }),
                shutdown: std::sync::Mutex::new(None),
                released: AtomicBool::new(false),
            }),
        })
    }
}

/// Claim every connector and transport, or none of them.
fn claim_all(connectors: &Connectors, transports: &[Arc<dyn Transport>]) -> Result<()> {
    let mut parts: Vec<(&Attachment, String)> = vec![
        (connectors.data().attachment(), "data connector".into()),
        (connectors.meta().attachment(), "meta connector".into()),
    ];
    parts.extend(
        transports
            .iter()
            .enumerate()
            .map(|(i, t)| (t.attachment(), format!("transport #{}", i))),
    );

    for (n, (attachment, name)) in parts.iter().enumerate() {
        if !attachment.claim() {
            for (claimed, _) in &parts[..n] {
                claimed.release();
            }
            return Err(SyncletError::AlreadyAttached(name.clone()));
        }
    }
    Ok(())
}

struct State {
    status: Status,
    /// Indices of transports that connected on the last start.
    connected: Vec<usize>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: SyncletConfig,
    client_id: String,
    reconciler: Reconciler,
    transports: Vec<Arc<dyn Transport>>,
    hooks: Arc<dyn SyncletHooks>,
    clock: Mutex<Clock>,
    /// Serializes start, stop and destroy.
    lifecycle: Mutex<()>,
    state: Mutex<State>,
    /// Dropping the sender tells background tasks to finish.
    shutdown: std::sync::Mutex<Option<watch::Sender<()>>>,
    released: AtomicBool,
}

/// One replica of a synchronized tree.
///
/// Dropping a Synclet stops its background tasks and releases its claims but
/// leaves transports and connectors connected; call [`Synclet::stop`] or
/// [`Synclet::destroy`] first to disconnect them.
pub struct Synclet {
    inner: Arc<Inner>,
}

impl Synclet {
    pub fn builder(config: SyncletConfig) -> SyncletBuilder {
        SyncletBuilder::new(config)
    }

    /// Client id embedded in every timestamp this Synclet produces.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn depth(&self) -> usize {
        self.inner.config.depth
    }

    pub async fn status(&self) -> Status {
        self.inner.state.lock().await.status
    }

    /// The connectors this Synclet owns.
    pub fn connectors(&self) -> &Connectors {
        self.inner.reconciler.connectors()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect connectors and transports, then sync with every transport.
    ///
    /// A connector failure leaves the Synclet in its previous state. A
    /// transport failure does not: the Synclet starts with the transports
    /// that did connect and reports the others in
    /// [`SyncletError::TransportsFailed`].
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        match self.status().await {
            Status::Started => return Ok(()),
            Status::Destroyed => return Err(SyncletError::Destroyed),
            Status::Created | Status::Stopped => {}
        }

        let connectors = self.inner.reconciler.connectors();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        connectors.data().connect(changes_tx).await?;
        if let Err(e) = connectors.meta().connect().await {
            self.disconnect_connectors().await;
            return Err(e.into());
        }
        {
            let mut clock = self.inner.clock.lock().await;
            match self.inner.reconciler.rebuild_hashes(&mut clock).await {
                Ok(stamped) if stamped > 0 => {
                    tracing::info!(stamped, "stamped pre-existing values")
                }
                Ok(_) => {}
                Err(e) => {
                    drop(clock);
                    self.disconnect_connectors().await;
                    return Err(e.into());
                }
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let mut tasks = vec![tokio::spawn(consume_changes(
            Arc::clone(&self.inner),
            changes_rx,
            shutdown_rx.clone(),
        ))];
        let mut connected = Vec::new();
        let mut failures = Vec::new();
        for (index, transport) in self.inner.transports.iter().enumerate() {
            let (packets_tx, packets_rx) = mpsc::unbounded_channel();
            match transport.connect(packets_tx).await {
                Ok(()) => {
                    tasks.push(tokio::spawn(receive_packets(
                        Arc::clone(&self.inner),
                        index,
                        packets_rx,
                        shutdown_rx.clone(),
                    )));
                    connected.push(index);
                }
                Err(error) => {
                    tracing::warn!(transport = index, %error, "transport failed to connect");
                    failures.push(TransportFailure { index, error });
                }
            }
        }

        if let Ok(mut shutdown) = self.inner.shutdown.lock() {
            *shutdown = Some(shutdown_tx);
        }
        {
            let mut state = self.inner.state.lock().await;
            state.status = Status::Started;
            state.connected = connected.clone();
            state.tasks = tasks;
        }
        tracing::info!(
            client_id = %self.inner.client_id,
            transports = connected.len(),
            "synclet started"
        );

        for index in connected {
            if let Err(error) = self.inner.sync_transport(index).await {
                tracing::warn!(transport = index, %error, "initial sync failed");
                failures.push(TransportFailure { index, error });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncletError::TransportsFailed(failures))
        }
    }

    /// Disconnect every transport and both connectors.
    ///
    /// Messages being applied finish first; incomplete inbound messages are
    /// discarded. Stopping a Synclet that is not started does nothing.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await
    }

    /// Stop, release every connector and transport, and refuse further use.
    pub async fn destroy(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let stopped = self.stop_locked().await;
        self.inner.state.lock().await.status = Status::Destroyed;
        self.inner.release();
        tracing::info!(client_id = %self.inner.client_id, "synclet destroyed");
        match stopped {
            Err(SyncletError::Destroyed) => Ok(()),
            other => other,
        }
    }

    async fn stop_locked(&self) -> Result<()> {
        let (connected, tasks) = {
            let mut state = self.inner.state.lock().await;
            match state.status {
                Status::Started => {}
                Status::Destroyed => return Err(SyncletError::Destroyed),
                Status::Created | Status::Stopped => return Ok(()),
            }
            state.status = Status::Stopped;
            (
                std::mem::take(&mut state.connected),
                std::mem::take(&mut state.tasks),
            )
        };

        if let Ok(mut shutdown) = self.inner.shutdown.lock() {
            shutdown.take();
        }
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }

        let mut first_error: Option<SyncletError> = None;
        for index in connected {
            if let Err(e) = self.inner.transports[index].disconnect().await {
                tracing::warn!(transport = index, error = %e, "transport failed to disconnect");
                first_error.get_or_insert(e.into());
            }
        }
        self.disconnect_connectors().await;
        tracing::info!(client_id = %self.inner.client_id, "synclet stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn disconnect_connectors(&self) {
        let connectors = self.inner.reconciler.connectors();
        if let Err(e) = connectors.data().disconnect().await {
            tracing::warn!(error = %e, "data connector failed to disconnect");
        }
        if let Err(e) = connectors.meta().disconnect().await {
            tracing::warn!(error = %e, "meta connector failed to disconnect");
        }
    }

    /// Re-run the root sync against every connected transport.
    pub async fn sync(&self) -> Result<()> {
        let connected = {
            let state = self.inner.state.lock().await;
            match state.status {
                Status::Started => state.connected.clone(),
                Status::Destroyed => return Err(SyncletError::Destroyed),
                Status::Created | Status::Stopped => return Err(SyncletError::NotStarted),
            }
        };
        let mut failures = Vec::new();
        for index in connected {
            if let Err(error) = self.inner.sync_transport(index).await {
                failures.push(TransportFailure { index, error });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncletError::TransportsFailed(failures))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Values
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a leaf value and, if started, push it to every peer.
    pub async fn set_value(&self, address: &Address, value: impl Into<Value>) -> Result<Timestamp> {
        self.write(address, value.into(), None).await
    }

    /// Like [`Synclet::set_value`], adding `context` to the outbound message.
    pub async fn set_value_with_context(
        &self,
        address: &Address,
        value: impl Into<Value>,
        context: Context,
    ) -> Result<Timestamp> {
        self.write(address, value.into(), Some(context)).await
    }

    /// Delete a leaf by writing the tombstone.
    pub async fn del_value(&self, address: &Address) -> Result<Timestamp> {
        self.write(address, Value::Tombstone, None).await
    }

    pub async fn del_value_with_context(&self, address: &Address, context: Context) -> Result<Timestamp> {
        self.write(address, Value::Tombstone, Some(context)).await
    }

    async fn write(&self, address: &Address, value: Value, context: Option<Context>) -> Result<Timestamp> {
        let status = self.status().await;
        if status == Status::Destroyed {
            return Err(SyncletError::Destroyed);
        }
        self.check_leaf(address)?;
        value
            .validate()
            .map_err(|e| SyncletError::InvalidValue(e.to_string()))?;

        let (timestamp, nodes) = {
            let mut clock = self.inner.clock.lock().await;
            let timestamp = self
                .inner
                .reconciler
                .apply_local(&mut clock, address, &value)
                .await?;
            let nodes = self
                .inner
                .reconciler
                .build_leaves(std::slice::from_ref(address))
                .await?;
            (timestamp, nodes)
        };

        if status == Status::Started {
            let failures = self.inner.broadcast(nodes, None, context.as_ref()).await;
            if !failures.is_empty() {
                return Err(SyncletError::TransportsFailed(failures));
            }
        }
        Ok(timestamp)
    }

    /// Current value of a leaf. Deleted and never-written leaves read as `None`.
    pub async fn get_value(&self, address: &Address) -> Result<Option<Value>> {
        Ok(self
            .get_leaf(address)
            .await?
            .map(|(_, value)| value)
            .filter(|value| !value.is_tombstone()))
    }

    /// Timestamp of a leaf, including deleted ones.
    pub async fn get_timestamp(&self, address: &Address) -> Result<Option<Timestamp>> {
        Ok(self.get_leaf(address).await?.map(|(timestamp, _)| timestamp))
    }

    async fn get_leaf(&self, address: &Address) -> Result<Option<(Timestamp, Value)>> {
        self.check_usable().await?;
        self.check_leaf(address)?;
        let _clock = self.inner.clock.lock().await;
        Ok(self.connectors().read_leaf(address).await?)
    }

    /// Snapshot of the data tree.
    pub async fn get_data(&self) -> Result<DataNode> {
        self.check_usable().await?;
        let _clock = self.inner.clock.lock().await;
        Ok(self.connectors().get_data().await?)
    }

    /// Snapshot of the meta tree.
    pub async fn get_meta(&self) -> Result<MetaNode> {
        self.check_usable().await?;
        let _clock = self.inner.clock.lock().await;
        Ok(self.connectors().get_meta().await?)
    }

    async fn check_usable(&self) -> Result<()> {
        if self.status().await == Status::Destroyed {
            Err(SyncletError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn check_leaf(&self, address: &Address) -> Result<()> {
        if address.len() == self.depth() {
            Ok(())
        } else {
            Err(SyncletError::InvalidAddress {
                address: address.clone(),
                depth: self.depth(),
            })
        }
    }
}

impl Drop for Synclet {
    fn drop(&mut self) {
        if let Ok(mut shutdown) = self.inner.shutdown.lock() {
            shutdown.take();
        }
        self.inner.release();
    }
}

impl fmt::Debug for Synclet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synclet")
            .field("client_id", &self.inner.client_id)
            .field("depth", &self.inner.config.depth)
            .field("transports", &self.inner.transports.len())
            .finish()
    }
}

impl Inner {
    /// Release every claim, once.
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let connectors = self.reconciler.connectors();
        connectors.data().attachment().release();
        connectors.meta().attachment().release();
        for transport in &self.transports {
            transport.attachment().release();
        }
    }

    async fn connected(&self) -> Vec<usize> {
        self.state.lock().await.connected.clone()
    }

    async fn sync_transport(&self, index: usize) -> std::result::Result<(), SyncError> {
        let nodes = {
            let _clock = self.clock.lock().await;
            self.reconciler.build_message(&Address::root()).await?
        };
        self.send(index, nodes, None).await
    }

    /// Wrap `nodes` with context and send them over one transport, unless
    /// the hooks veto it.
    async fn send(
        &self,
        index: usize,
        nodes: Vec<MessageNode>,
        extra: Option<&Context>,
    ) -> std::result::Result<(), SyncError> {
        let Some(message) = self.outbound(nodes, extra) else {
            return Ok(());
        };
        let packets = send_message(self.transports[index].as_ref(), &message).await?;
        tracing::trace!(transport = index, packets, nodes = message.nodes.len(), "sent message");
        Ok(())
    }

    /// Send to every connected transport except `except`, collecting failures.
    async fn broadcast(
        &self,
        nodes: Vec<MessageNode>,
        except: Option<usize>,
        extra: Option<&Context>,
    ) -> Vec<TransportFailure> {
        let mut failures = Vec::new();
        for index in self.connected().await {
            if Some(index) == except {
                continue;
            }
            if let Err(error) = self.send(index, nodes.clone(), extra).await {
                tracing::warn!(transport = index, %error, "failed to send message");
                failures.push(TransportFailure { index, error });
            }
        }
        failures
    }

    fn outbound(&self, nodes: Vec<MessageNode>, extra: Option<&Context>) -> Option<Message> {
        let first = nodes.first()?;
        let mut context: BTreeMap<String, Value> = self.config.send_context.clone();
        context.extend(self.hooks.send_context(first.address()));
        if let Some(extra) = extra {
            context.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if !self.hooks.can_send_message(&context) {
            tracing::debug!(address = %first.address(), "outbound message vetoed by hooks");
            return None;
        }
        Some(Message::new(nodes).with_context(context))
    }

    async fn handle_message(&self, from: usize, message: Message) -> std::result::Result<(), SyncError> {
        if !self.hooks.can_receive_message(&message.context) {
            tracing::debug!(transport = from, "inbound message rejected by hooks");
            return Ok(());
        }

        let (reply, pushed) = {
            let mut clock = self.clock.lock().await;
            let outcome = self.reconciler.receive(&mut clock, &message.nodes).await?;
            let pushed = if outcome.changed.is_empty() {
                Vec::new()
            } else {
                self.reconciler.build_leaves(&outcome.changed).await?
            };
            (outcome.reply, pushed)
        };

        // Changes are already applied, so peers hear about them even if the
        // reply to the sender fails.
        let replied = if reply.is_empty() {
            Ok(())
        } else {
            self.send(from, reply, None).await
        };
        if !pushed.is_empty() {
            tracing::debug!(transport = from, changed = pushed.len(), "propagating remote changes");
            self.broadcast(pushed, Some(from), None).await;
        }
        replied
    }

    async fn handle_external_change(&self, address: &Address) -> std::result::Result<(), SyncError> {
        let nodes = {
            let mut clock = self.clock.lock().await;
            self.reconciler.stamp_external(&mut clock, address).await?;
            self.reconciler
                .build_leaves(std::slice::from_ref(address))
                .await?
        };
        tracing::debug!(%address, "propagating external change");
        self.broadcast(nodes, None, None).await;
        Ok(())
    }
}

/// Reassemble and apply packets from one transport until shutdown.
async fn receive_packets(
    inner: Arc<Inner>,
    index: usize,
    mut packets: PacketReceiver,
    mut shutdown: watch::Receiver<()>,
) {
    let mut reassembler = Reassembler::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            packet = packets.recv() => {
                let Some(packet) = packet else { break };
                if let Some(message) = reassembler.receive(&packet) {
                    if let Err(error) = inner.handle_message(index, message).await {
                        tracing::warn!(transport = index, %error, "failed to apply message");
                    }
                }
            }
        }
    }
    if reassembler.pending_count() > 0 {
        tracing::debug!(
            transport = index,
            pending = reassembler.pending_count(),
            "discarding incomplete messages"
        );
    }
}

/// Stamp and propagate values changed behind the Synclet's back.
async fn consume_changes(
    inner: Arc<Inner>,
    mut changes: ChangeReceiver,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            address = changes.recv() => {
                let Some(address) = address else { break };
                if let Err(error) = inner.handle_external_change(&address).await {
                    tracing::warn!(%address, %error, "failed to apply external change");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synclets_core::ManualTimeSource;
    use synclets_sync::MemoryBus;

    fn config(depth: usize, unique_id: &str) -> SyncletConfig {
        SyncletConfig {
            depth,
            unique_id: Some(unique_id.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let synclet = Synclet::builder(config(1, "a")).build().unwrap();
        assert_eq!(synclet.status().await, Status::Created);

        synclet.start().await.unwrap();
        assert_eq!(synclet.status().await, Status::Started);
        synclet.start().await.unwrap();

        synclet.stop().await.unwrap();
        assert_eq!(synclet.status().await, Status::Stopped);
        synclet.start().await.unwrap();

        synclet.destroy().await.unwrap();
        assert_eq!(synclet.status().await, Status::Destroyed);
        assert!(matches!(synclet.start().await, Err(SyncletError::Destroyed)));
        assert!(matches!(
            synclet.set_value(&Address::new(["k"]), "v").await,
            Err(SyncletError::Destroyed)
        ));
        assert!(matches!(synclet.get_data().await, Err(SyncletError::Destroyed)));
    }

    #[tokio::test]
    async fn test_set_and_get_without_start() {
        let synclet = Synclet::builder(config(2, "a")).build().unwrap();
        let address = Address::new(["t", "r"]);

        let ts = synclet.set_value(&address, 5.0).await.unwrap();
        assert_eq!(synclet.get_value(&address).await.unwrap(), Some(Value::from(5.0)));
        assert_eq!(synclet.get_timestamp(&address).await.unwrap(), Some(ts.clone()));

        let deleted = synclet.del_value(&address).await.unwrap();
        assert!(deleted > ts);
        assert_eq!(synclet.get_value(&address).await.unwrap(), None);
        assert_eq!(synclet.get_timestamp(&address).await.unwrap(), Some(deleted));
    }

    #[tokio::test]
    async fn test_invalid_address_and_value() {
        let synclet = Synclet::builder(config(2, "a")).build().unwrap();
        assert!(matches!(
            synclet.set_value(&Address::new(["t"]), 1.0).await,
            Err(SyncletError::InvalidAddress { depth: 2, .. })
        ));
        assert!(matches!(
            synclet.get_value(&Address::new(["t", "r", "c"])).await,
            Err(SyncletError::InvalidAddress { .. })
        ));
        assert!(matches!(
            synclet
                .set_value(&Address::new(["t", "r"]), synclets_core::UNDEFINED_SENTINEL)
                .await,
            Err(SyncletError::InvalidValue(_))
        ));
        assert!(matches!(
            synclet.set_value(&Address::new(["t", "r"]), f64::INFINITY).await,
            Err(SyncletError::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn test_connector_claimed_once() {
        let data: Arc<dyn DataConnector> = Arc::new(MemoryDataConnector::new(1));
        let first = Synclet::builder(config(1, "a"))
            .data_connector(data.clone())
            .build()
            .unwrap();

        let second = Synclet::builder(config(1, "b"))
            .data_connector(data.clone())
            .build();
        assert!(matches!(second, Err(SyncletError::AlreadyAttached(_))));

        drop(first);
        assert!(Synclet::builder(config(1, "c"))
            .data_connector(data)
            .build()
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_claim_releases_partial_claims() {
        let bus = MemoryBus::new();
        let transport: Arc<dyn Transport> = Arc::new(bus.transport());
        let meta: Arc<dyn MetaConnector> = Arc::new(MemoryMetaConnector::new(1));
        let _owner = Synclet::builder(config(1, "a"))
            .transport(transport.clone())
            .build()
            .unwrap();

        let result = Synclet::builder(config(1, "b"))
            .meta_connector(meta.clone())
            .transport(transport)
            .build();
        assert!(matches!(result, Err(SyncletError::AlreadyAttached(_))));
        assert!(!meta.attachment().is_claimed());
    }

    #[tokio::test]
    async fn test_depth_mismatch() {
        let result = Synclet::builder(config(2, "a"))
            .data_connector(Arc::new(MemoryDataConnector::new(3)))
            .build();
        assert!(matches!(
            result,
            Err(SyncletError::DepthMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_fragment_size_validated() {
        let bus = MemoryBus::new();
        let result = Synclet::builder(config(1, "a"))
            .transport(Arc::new(bus.transport_with_fragment_size(4)))
            .build();
        assert!(matches!(
            result,
            Err(SyncletError::Sync(SyncError::InvalidFragmentSize { .. }))
        ));
    }

    #[tokio::test]
    async fn test_client_id_from_unique_id() {
        let time = Arc::new(ManualTimeSource::new(1_000));
        let a = Synclet::builder(config(1, "same"))
            .time_source(time.clone())
            .build()
            .unwrap();
        let b = Synclet::builder(config(1, "same"))
            .time_source(time)
            .build()
            .unwrap();
        assert_eq!(a.client_id(), b.client_id());

        let ts = a.set_value(&Address::new(["k"]), true).await.unwrap();
        assert!(ts.as_str().ends_with(a.client_id()));
    }
}
