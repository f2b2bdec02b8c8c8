//! Test fixtures and helpers.
//!
//! Groups of Synclets wired together over in-memory transports.

use std::sync::Arc;
use std::time::Duration;

use synclets::{MemoryBroker, MemoryBus, Result, Synclet, SyncletConfig, TimeSource, Transport};
use synclets_store::Connectors;
use synclets_sync::{verify_convergence, verify_hash_chain, ConvergenceResult, DEFAULT_FRAGMENT_SIZE};

/// How the replicas of a [`Replicas`] fixture are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Everyone on one shared bus.
    Pool,
    /// Replica `i` talks only to `i - 1` and `i + 1`.
    Chain,
    /// A chain whose ends are also connected.
    Ring,
    /// Everyone a client of one relay.
    Broker,
}

/// Options for building a [`Replicas`] fixture.
#[derive(Clone)]
pub struct ReplicaOptions {
    pub depth: usize,
    pub fragment_size: usize,
    /// Shared time source. Each replica reads the system clock when absent.
    pub time: Option<Arc<dyn TimeSource>>,
}

impl ReplicaOptions {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            time: None,
        }
    }

    pub fn fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size;
        self
    }

    pub fn time(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }
}

/// A set of connected Synclets named `replica-0`, `replica-1`, ...
pub struct Replicas {
    pub topology: Topology,
    pub synclets: Vec<Synclet>,
}

impl Replicas {
    /// Build `count` replicas of the given depth. They are not started.
    pub fn new(topology: Topology, count: usize, depth: usize) -> Result<Self> {
        Self::with_options(topology, count, ReplicaOptions::new(depth))
    }

    pub fn with_options(topology: Topology, count: usize, options: ReplicaOptions) -> Result<Self> {
        let mut transports: Vec<Vec<Arc<dyn Transport>>> = vec![Vec::new(); count];
        let size = options.fragment_size;
        match topology {
            Topology::Pool => {
                let bus = MemoryBus::new();
                for slot in &mut transports {
                    slot.push(Arc::new(bus.transport_with_fragment_size(size)));
                }
            }
            Topology::Broker => {
                let broker = MemoryBroker::new();
                for slot in &mut transports {
                    slot.push(Arc::new(broker.transport_with_fragment_size(size)));
                }
            }
            Topology::Chain | Topology::Ring => {
                let mut links: Vec<(usize, usize)> = (1..count).map(|i| (i - 1, i)).collect();
                if topology == Topology::Ring && count > 2 {
                    links.push((count - 1, 0));
                }
                for (a, b) in links {
                    let bus = MemoryBus::new();
                    transports[a].push(Arc::new(bus.transport_with_fragment_size(size)));
                    transports[b].push(Arc::new(bus.transport_with_fragment_size(size)));
                }
            }
        }

        let synclets = transports
            .into_iter()
            .enumerate()
            .map(|(i, transports)| {
                let config = SyncletConfig {
                    depth: options.depth,
                    unique_id: Some(format!("replica-{}", i)),
                    ..SyncletConfig::default()
                };
                let mut builder = Synclet::builder(config);
                for transport in transports {
                    builder = builder.transport(transport);
                }
                if let Some(time) = &options.time {
                    builder = builder.time_source(Arc::clone(time));
                }
                builder.build()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { topology, synclets })
    }

    pub fn len(&self) -> usize {
        self.synclets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synclets.is_empty()
    }

    pub async fn start_all(&self) -> Result<()> {
        for synclet in &self.synclets {
            synclet.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<()> {
        for synclet in &self.synclets {
            synclet.stop().await?;
        }
        Ok(())
    }

    pub fn connectors(&self) -> Vec<Connectors> {
        self.synclets.iter().map(|s| s.connectors().clone()).collect()
    }

    /// Poll until every replica holds the same trees or `timeout` passes.
    pub async fn wait_for_convergence(&self, timeout: Duration) -> Result<ConvergenceResult> {
        wait_for_convergence(&self.connectors(), timeout).await
    }
}

impl std::ops::Index<usize> for Replicas {
    type Output = Synclet;

    fn index(&self, index: usize) -> &Synclet {
        &self.synclets[index]
    }
}

/// Poll until `replicas` converge with intact hash chains, or `timeout`
/// passes. Returns the last comparison.
pub async fn wait_for_convergence(
    replicas: &[Connectors],
    timeout: Duration,
) -> Result<ConvergenceResult> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let result = verify_convergence(replicas).await?;
        if result.is_converged() {
            let mut intact = true;
            for connectors in replicas {
                intact &= verify_hash_chain(connectors).await?.is_empty();
            }
            if intact {
                return Ok(result);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(result);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give in-flight messages a moment to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Install a test-friendly tracing subscriber once. Filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
