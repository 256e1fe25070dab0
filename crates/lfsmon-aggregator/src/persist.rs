//! Persistence policies.
//!
//! Writers hand documents to one shared [`SamplePersister`] picked at
//! startup. Every policy prefers dropping a write over stalling the node
//! pipeline for longer than its bounded retry.

use std::collections::BTreeMap;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lfsmon_store::{DocumentSink, SampleDocument, StoreError, Watermark};
use lfsmon_utils::{sleep_or_shutdown, FixedRetry, ShutdownSignal};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::{DatabaseConfig, PersistPolicy};
use crate::error::CollectError;

#[async_trait]
pub trait SamplePersister: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store one cycle's documents of one collection.
    async fn insert(&self, collection: &str, docs: Vec<SampleDocument>) -> Result<(), CollectError>;

    /// Advance the watermark. Only issued after the cycle's inserts were accepted.
    async fn update(&self, mark: Watermark) -> Result<(), CollectError>;

    /// Flush what is pending and stop background work.
    async fn shutdown(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per write, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            attempts: config.retry_count,
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempts run out.
/// The sink is refreshed before every retry.
async fn with_retry<F, Fut>(
    sink: &dyn DocumentSink,
    policy: RetryPolicy,
    shutdown: &mut ShutdownSignal,
    what: &'static str,
    mut op: F,
) -> Result<(), CollectError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<(), StoreError>> + Send,
{
    let mut retry = FixedRetry::new(policy.delay, policy.attempts);
    loop {
        let e = match op().await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_transient() => return Err(e.into()),
            Err(e) => e,
        };
        let Some(wait) = retry.next_wait() else {
            return Err(e.into());
        };
        tracing::warn!(what, attempt = retry.attempts(), error = %e, "sink write failed, refreshing connection");
        if let Err(re) = sink.refresh().await {
            tracing::warn!(error = %re, "sink refresh failed");
        }
        if !sleep_or_shutdown(wait, shutdown).await {
            return Err(CollectError::Shutdown);
        }
    }
}

/// Writes in the caller's task.
pub struct SyncPersister {
    sink: Arc<dyn DocumentSink>,
    policy: RetryPolicy,
    shutdown: ShutdownSignal,
}

impl SyncPersister {
    pub fn new(sink: Arc<dyn DocumentSink>, policy: RetryPolicy, shutdown: ShutdownSignal) -> Self {
        Self {
            sink,
            policy,
            shutdown,
        }
    }
}

#[async_trait]
impl SamplePersister for SyncPersister {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn insert(&self, collection: &str, docs: Vec<SampleDocument>) -> Result<(), CollectError> {
        let sink = self.sink.as_ref();
        let mut shutdown = self.shutdown.clone();
        with_retry(sink, self.policy, &mut shutdown, "insert", || sink.insert_many(collection, &docs)).await
    }

    async fn update(&self, mark: Watermark) -> Result<(), CollectError> {
        let sink = self.sink.as_ref();
        let mut shutdown = self.shutdown.clone();
        with_retry(sink, self.policy, &mut shutdown, "watermark", || sink.upsert_watermark(&mark)).await
    }

    async fn shutdown(&self) {}
}

enum PersistOp {
    Insert {
        collection: String,
        docs: Vec<SampleDocument>,
    },
    Update(Watermark),
}

impl PersistOp {
    fn len(&self) -> usize {
        match self {
            PersistOp::Insert { docs, .. } => docs.len(),
            PersistOp::Update(_) => 1,
        }
    }
}

/// Hands writes to a bounded queue drained by one background task.
///
/// A full queue drops the write instead of waiting. A watermark queued
/// behind a failed insert is not applied.
pub struct QueuedPersister {
    tx: Mutex<Option<mpsc::Sender<PersistOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicUsize,
}

impl QueuedPersister {
    pub fn spawn(
        sink: Arc<dyn DocumentSink>,
        policy: RetryPolicy,
        depth: usize,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let worker = tokio::spawn(drain_queue(sink, policy, rx, shutdown));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Operations waiting in the queue.
    pub fn pending(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Documents dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, op: PersistOp) -> Result<(), CollectError> {
        let Some(tx) = self.tx.lock().clone() else {
            return Err(CollectError::Shutdown);
        };
        match tx.try_send(op) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(op)) => {
                let dropped = op.len();
                self.dropped.fetch_add(dropped, Ordering::Relaxed);
                Err(CollectError::QueueFull { dropped })
            }
            Err(TrySendError::Closed(_)) => Err(CollectError::Shutdown),
        }
    }
}

async fn drain_queue(
    sink: Arc<dyn DocumentSink>,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<PersistOp>,
    mut shutdown: ShutdownSignal,
) {
    let mut failed_since_mark = false;
    while let Some(op) = rx.recv().await {
        let sink_ref = sink.as_ref();
        match op {
            PersistOp::Insert { collection, docs } => {
                let result = with_retry(sink_ref, policy, &mut shutdown, "insert", || {
                    sink_ref.insert_many(&collection, &docs)
                })
                .await;
                if let Err(e) = result {
                    tracing::error!(%collection, docs = docs.len(), error = %e, "dropping queued insert");
                    failed_since_mark = true;
                }
            }
            PersistOp::Update(mark) => {
                if mem::take(&mut failed_since_mark) {
                    tracing::warn!(ts = mark.ts, "watermark not advanced, an earlier insert was dropped");
                    continue;
                }
                let result =
                    with_retry(sink_ref, policy, &mut shutdown, "watermark", || sink_ref.upsert_watermark(&mark))
                        .await;
                if let Err(e) = result {
                    tracing::error!(ts = mark.ts, error = %e, "dropping queued watermark");
                }
            }
        }
    }
    tracing::debug!("persistence queue drained");
}

#[async_trait]
impl SamplePersister for QueuedPersister {
    fn name(&self) -> &'static str {
        "queued"
    }

    async fn insert(&self, collection: &str, docs: Vec<SampleDocument>) -> Result<(), CollectError> {
        self.enqueue(PersistOp::Insert {
            collection: collection.to_string(),
            docs,
        })
    }

    async fn update(&self, mark: Watermark) -> Result<(), CollectError> {
        self.enqueue(PersistOp::Update(mark))
    }

    async fn shutdown(&self) {
        // Closing the sender lets the worker finish what is queued.
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "persistence worker panicked");
            }
        }
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::warn!(dropped, "documents dropped on a full persistence queue");
        }
    }
}

#[derive(Default)]
struct FlushState {
    /// A batch was dropped since the last watermark.
    dropped: bool,
    /// Newest cycle whose watermark was held back.
    held: Option<i64>,
}

/// Accumulates documents and writes them once `batch_size` are pending,
/// or when a watermark is due.
///
/// Flushes run one at a time. A watermark waits for any flush in flight and
/// is held back when a batch was dropped since the previous watermark; a
/// held cycle stays held for every later writer of it.
pub struct BatchedPersister {
    sink: Arc<dyn DocumentSink>,
    policy: RetryPolicy,
    batch_size: usize,
    pending: Mutex<BTreeMap<String, Vec<SampleDocument>>>,
    /// Held across every flush.
    flushing: tokio::sync::Mutex<FlushState>,
    closed: AtomicBool,
    shutdown: ShutdownSignal,
}

impl BatchedPersister {
    pub fn new(
        sink: Arc<dyn DocumentSink>,
        policy: RetryPolicy,
        batch_size: usize,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            sink,
            policy,
            batch_size: batch_size.max(1),
            pending: Mutex::new(BTreeMap::new()),
            flushing: tokio::sync::Mutex::new(FlushState::default()),
            closed: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    /// Write everything pending; the first failure is returned after all
    /// collections were attempted. The caller holds `flushing`.
    async fn flush_locked(&self, state: &mut FlushState) -> Result<(), CollectError> {
        let batch = mem::take(&mut *self.pending.lock());
        let sink = self.sink.as_ref();
        let mut shutdown = self.shutdown.clone();
        let mut first_err = None;
        for (collection, docs) in batch {
            let result =
                with_retry(sink, self.policy, &mut shutdown, "batch", || sink.insert_many(&collection, &docs)).await;
            if let Err(e) = result {
                tracing::error!(%collection, docs = docs.len(), error = %e, "dropping batch");
                state.dropped = true;
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl SamplePersister for BatchedPersister {
    fn name(&self) -> &'static str {
        "batched"
    }

    async fn insert(&self, collection: &str, docs: Vec<SampleDocument>) -> Result<(), CollectError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CollectError::Shutdown);
        }
        let full = {
            let mut pending = self.pending.lock();
            pending.entry(collection.to_string()).or_default().extend(docs);
            pending.values().map(Vec::len).sum::<usize>() >= self.batch_size
        };
        if full {
            let mut state = self.flushing.lock().await;
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    async fn update(&self, mark: Watermark) -> Result<(), CollectError> {
        let mut state = self.flushing.lock().await;
        let flushed = self.flush_locked(&mut state).await;
        if mem::take(&mut state.dropped) {
            state.held = state.held.max(Some(mark.ts));
            tracing::warn!(ts = mark.ts, "watermark not advanced, a batch was dropped");
        }
        flushed?;
        if state.held >= Some(mark.ts) {
            return Err(CollectError::WatermarkHeld { ts: mark.ts });
        }
        let sink = self.sink.as_ref();
        let mut shutdown = self.shutdown.clone();
        with_retry(sink, self.policy, &mut shutdown, "watermark", || sink.upsert_watermark(&mark)).await
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut state = self.flushing.lock().await;
        if let Err(e) = self.flush_locked(&mut state).await {
            tracing::error!(error = %e, "final batch flush failed");
        }
    }
}

/// The persister selected by `database.policy`.
pub fn build_persister(
    config: &DatabaseConfig,
    sink: Arc<dyn DocumentSink>,
    shutdown: ShutdownSignal,
) -> Arc<dyn SamplePersister> {
    let policy = RetryPolicy::from_config(config);
    let persister: Arc<dyn SamplePersister> = match config.policy {
        PersistPolicy::Sync => Arc::new(SyncPersister::new(sink, policy, shutdown)),
        PersistPolicy::Queued => Arc::new(QueuedPersister::spawn(sink, policy, config.queue_depth, shutdown)),
        PersistPolicy::Batched => Arc::new(BatchedPersister::new(sink, policy, config.batch_size, shutdown)),
    };
    tracing::info!(policy = persister.name(), attempts = policy.attempts, "persister ready");
    persister
}
