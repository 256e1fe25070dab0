//! In-process node collector used by the pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lfsmon_snapshot::{AbsoluteCounters, CounterSource, MemorySource, SnapshotEngine};
use lfsmon_types::{Clock, CounterDiff, CounterVector, ManualClock, Status, StatusCode};
use crate::client::{CounterConnector, CounterSession};
use crate::error::CollectError;

#[derive(Default)]
struct Faults {
    connects: AtomicUsize,
    connect_failures: AtomicUsize,
    diff_failures: AtomicUsize,
    diffs: AtomicUsize,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Serves a real [`SnapshotEngine`] over a [`MemorySource`] without a socket.
pub(crate) struct LocalConnector<V: CounterVector> {
    source: Arc<MemorySource<V>>,
    clock: Arc<ManualClock>,
    faults: Arc<Faults>,
}

impl<V: CounterVector> LocalConnector<V> {
    pub fn new(initial: AbsoluteCounters<V>, now_secs: i64) -> Self {
        Self {
            source: Arc::new(MemorySource::new(initial)),
            clock: Arc::new(ManualClock::at_secs(now_secs)),
            faults: Arc::default(),
        }
    }

    /// Move the node clock forward and replace its counters.
    pub fn advance(&self, secs: i64, counters: AbsoluteCounters<V>) {
        self.clock.advance_millis(secs * 1000);
        self.source.set(counters);
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.faults.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_diffs(&self, n: usize) {
        self.faults.diff_failures.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.faults.connects.load(Ordering::SeqCst)
    }

    pub fn diff_calls(&self) -> usize {
        self.faults.diffs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V: CounterVector> CounterConnector<V> for LocalConnector<V> {
    async fn connect(&self, node: &str) -> Result<Box<dyn CounterSession<V>>, CollectError> {
        self.faults.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.faults.connect_failures) {
            return Err(CollectError::Connection(lfsmon_net::NetError::Io(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, format!("{node} refused")),
            )));
        }
        let source: Arc<dyn CounterSource<V>> = self.source.clone();
        let clock: Arc<dyn Clock> = self.clock.clone();
        Ok(Box::new(LocalSession {
            engine: SnapshotEngine::new(source, clock),
            source: self.source.clone(),
            faults: self.faults.clone(),
        }))
    }
}

struct LocalSession<V: CounterVector> {
    engine: SnapshotEngine<V>,
    source: Arc<MemorySource<V>>,
    faults: Arc<Faults>,
}

#[async_trait]
impl<V: CounterVector> CounterSession<V> for LocalSession<V> {
    async fn initialize_baseline(&mut self) -> Result<usize, CollectError> {
        self.engine
            .baseline()
            .map_err(|e| CollectError::Protocol(Status::from(e)))
    }

    async fn get_diff(&mut self) -> Result<CounterDiff<V>, CollectError> {
        self.faults.diffs.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.faults.diff_failures) {
            return Err(CollectError::Connection(lfsmon_net::NetError::ConnectionClosed));
        }
        self.engine
            .diff_forward()
            .map_err(|e| CollectError::Protocol(Status::from(e)))
    }

    async fn list_active_targets(&mut self) -> Result<Vec<String>, CollectError> {
        self.source
            .list_targets()
            .map_err(|e| CollectError::Protocol(Status::with_message(StatusCode::UNKNOWN, e.to_string())))
    }

    async fn close(&mut self) {}
}
