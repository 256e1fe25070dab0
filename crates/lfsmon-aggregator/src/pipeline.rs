//! One reader and one writer per node, joined by a bounded queue.
//!
//! The reader is the only task that talks to its node. When the queue is
//! full its push waits, which delays its next ready token; the scheduler
//! then simply skips the node. Nothing else is held up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lfsmon_types::{align_timestamp, Clock, CounterVector, Sample};
use lfsmon_utils::{BackgroundRunner, ShutdownSignal};
use tokio::sync::mpsc;

use crate::client::{CounterConnector, ProtocolClient};
use crate::registry::ActiveTargets;
use crate::scheduler::{release_pair, NodeSlot, ReleaseGate};
use crate::stats::StatsCollector;
use crate::writer::PersistenceWriter;

/// State shared by every node pipeline.
#[derive(Clone)]
pub struct PipelineShared {
    pub clock: Arc<dyn Clock>,
    pub snap_interval: u64,
    pub max_entries: usize,
    pub retry_delay: Duration,
    pub registry: Arc<ActiveTargets>,
    pub stats: Arc<StatsCollector>,
}

pub struct NodeReader<V: CounterVector> {
    client: ProtocolClient<V>,
    gate: ReleaseGate,
    queue: mpsc::Sender<Sample<V>>,
    shared: PipelineShared,
    cycles: u64,
}

impl<V: CounterVector> NodeReader<V> {
    pub fn new(
        client: ProtocolClient<V>,
        gate: ReleaseGate,
        queue: mpsc::Sender<Sample<V>>,
        shared: PipelineShared,
    ) -> Self {
        Self {
            client,
            gate,
            queue,
            shared,
            cycles: 0,
        }
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        let node = self.client.node().to_string();
        tracing::info!(%node, role = %V::ROLE, "reader started");
        loop {
            if !self.client.establish(&mut shutdown).await {
                break;
            }
            if !self.gate.wait_for_release(&mut shutdown).await {
                break;
            }
            let Some(sample) = self.collect(&mut shutdown).await else {
                continue;
            };
            if !self.push(sample, &mut shutdown).await {
                break;
            }
        }
        self.client.disconnect().await;
        tracing::info!(%node, role = %V::ROLE, cycles = self.cycles, "reader stopped");
    }

    /// One released cycle. `None` when the diff failed; the client has
    /// already dropped the connection in that case.
    async fn collect(&mut self, shutdown: &mut ShutdownSignal) -> Option<Sample<V>> {
        let started = Instant::now();
        let diff = match self.client.diff(shutdown).await {
            Ok(diff) => diff,
            Err(e) => {
                tracing::debug!(node = self.client.node(), error = %e, "cycle lost");
                return None;
            }
        };
        let ts = align_timestamp(self.shared.clock.now().timestamp(), self.shared.snap_interval);
        let sample = Sample::from_diff(self.client.node(), ts, diff);
        self.cycles += 1;
        self.shared
            .registry
            .update(V::ROLE, self.client.node(), self.client.active_targets());
        self.shared
            .stats
            .record_collect(self.client.node(), started.elapsed(), sample.item_count());
        Some(sample)
    }

    /// Blocks while the queue is full.
    async fn push(&mut self, sample: Sample<V>, shutdown: &mut ShutdownSignal) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            sent = self.queue.send(sample) => sent.is_ok(),
            _ = shutdown.changed() => false,
        }
    }
}

pub struct NodeWriter<V: CounterVector> {
    node: String,
    queue: mpsc::Receiver<Sample<V>>,
    writer: Arc<PersistenceWriter>,
}

impl<V: CounterVector> NodeWriter<V> {
    pub fn new(node: impl Into<String>, queue: mpsc::Receiver<Sample<V>>, writer: Arc<PersistenceWriter>) -> Self {
        Self {
            node: node.into(),
            queue,
            writer,
        }
    }

    /// Drain the queue until the reader has gone and the queue is empty.
    pub async fn run(mut self) {
        while let Some(sample) = self.queue.recv().await {
            match self.writer.write(&sample).await {
                Ok(items) => tracing::debug!(node = %self.node, ts = sample.timestamp, items, "sample stored"),
                Err(e) => tracing::error!(
                    node = %self.node,
                    ts = sample.timestamp,
                    items = sample.item_count(),
                    error = %e,
                    "sample dropped"
                ),
            }
        }
        tracing::info!(node = %self.node, "writer stopped");
    }
}

/// Spawn the reader and writer of `node` and return its scheduler slot.
pub fn spawn_node_pipeline<V: CounterVector>(
    runner: &mut BackgroundRunner,
    node: &str,
    connector: Arc<dyn CounterConnector<V>>,
    writer: Arc<PersistenceWriter>,
    shared: &PipelineShared,
) -> NodeSlot {
    let (slot, gate) = release_pair(node, V::ROLE);
    let (tx, rx) = mpsc::channel(shared.max_entries.max(1));
    let client = ProtocolClient::new(node, connector, shared.retry_delay);
    let reader = NodeReader::new(client, gate, tx, shared.clone());
    let writer = NodeWriter::new(node, rx, writer);
    runner.spawn(format!("reader:{node}"), move |shutdown| reader.run(shutdown));
    // The writer stops once the reader has dropped its end of the queue.
    runner.spawn(format!("writer:{node}"), move |_shutdown| writer.run());
    slot
}
