//! The central clock.
//!
//! Each node reader owns a [`ReleaseGate`] and the [`Scheduler`] holds the
//! matching [`NodeSlot`]. A reader announces it is idle by sending a ready
//! token and then waits for a go token. On every tick the scheduler scans
//! its slots in a fixed order (metadata servers first) and releases exactly
//! the nodes whose ready token is waiting. It never awaits a node.

use std::sync::Arc;
use std::time::Duration;

use lfsmon_types::Role;
use lfsmon_utils::ShutdownSignal;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::stats::StatsCollector;

/// Reader side of the ready/go handshake.
pub struct ReleaseGate {
    ready_tx: mpsc::Sender<()>,
    go_rx: mpsc::Receiver<()>,
}

impl ReleaseGate {
    /// Announce readiness and wait to be released.
    ///
    /// Returns `false` on shutdown or when the scheduler is gone.
    pub async fn wait_for_release(&mut self, shutdown: &mut ShutdownSignal) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            sent = self.ready_tx.send(()) => {
                if sent.is_err() {
                    return false;
                }
            }
            _ = shutdown.changed() => return false,
        }
        tokio::select! {
            go = self.go_rx.recv() => go.is_some(),
            _ = shutdown.changed() => false,
        }
    }
}

/// Scheduler side of one node's handshake.
pub struct NodeSlot {
    node: String,
    role: Role,
    ready_rx: mpsc::Receiver<()>,
    go_tx: mpsc::Sender<()>,
}

impl NodeSlot {
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// A connected slot and gate for `node`.
pub fn release_pair(node: impl Into<String>, role: Role) -> (NodeSlot, ReleaseGate) {
    let (ready_tx, ready_rx) = mpsc::channel(1);
    let (go_tx, go_rx) = mpsc::channel(1);
    (
        NodeSlot {
            node: node.into(),
            role,
            ready_rx,
            go_tx,
        },
        ReleaseGate { ready_tx, go_rx },
    )
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub released: Vec<String>,
    /// Busy nodes: mid-cycle, reconnecting or blocked on a full queue.
    pub skipped: Vec<String>,
    /// Nodes whose reader has exited.
    pub gone: Vec<String>,
}

pub struct Scheduler {
    slots: Vec<NodeSlot>,
    interval: Duration,
    stats: Arc<StatsCollector>,
    ticks: u64,
}

impl Scheduler {
    pub fn new(interval: Duration, stats: Arc<StatsCollector>) -> Self {
        Self {
            slots: Vec::new(),
            interval,
            stats,
            ticks: 0,
        }
    }

    /// Add a node; metadata servers stay ahead of storage servers, and
    /// nodes of one role keep the order they were added in.
    pub fn add(&mut self, slot: NodeSlot) {
        self.slots.push(slot);
        self.slots.sort_by_key(|s| s.role);
    }

    pub fn node_order(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.node.as_str()).collect()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One non-blocking pass over every node.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport::default();
        for slot in &mut self.slots {
            match slot.ready_rx.try_recv() {
                Ok(()) => match slot.go_tx.try_send(()) {
                    Ok(()) => report.released.push(slot.node.clone()),
                    Err(_) => report.gone.push(slot.node.clone()),
                },
                Err(TryRecvError::Empty) => report.skipped.push(slot.node.clone()),
                Err(TryRecvError::Disconnected) => report.gone.push(slot.node.clone()),
            }
        }
        report
    }

    /// Tick every `interval` until shutdown.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(nodes = self.slots.len(), interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick();
                    if !report.skipped.is_empty() {
                        tracing::debug!(tick = self.ticks, skipped = ?report.skipped, "busy nodes skipped");
                    }
                    if !report.gone.is_empty() {
                        tracing::warn!(tick = self.ticks, gone = ?report.gone, "node readers have exited");
                    }
                    self.stats.log_summary();
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(ticks = self.ticks, "scheduler stopped");
    }
}
