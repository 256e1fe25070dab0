use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::document::{validate_collection, SampleDocument, SampleQuery, Watermark};
use crate::error::StoreError;
use crate::sink::DocumentSink;

/// A sink kept in process memory.
///
/// Can be told to fail the next N writes or to stall every write, which is
/// how the retry and backpressure paths are exercised.
#[derive(Default)]
pub struct MemorySink {
    collections: Mutex<BTreeMap<String, Vec<SampleDocument>>>,
    index_calls: Mutex<HashMap<String, usize>>,
    watermarks: Mutex<HashMap<String, i64>>,
    fail_writes: AtomicUsize,
    refreshes: AtomicUsize,
    write_delay: Mutex<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with [`StoreError::Unreachable`].
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Stall every insert and upsert by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn index_calls(&self, collection: &str) -> usize {
        self.index_calls.lock().get(collection).copied().unwrap_or(0)
    }

    pub fn documents(&self, collection: &str) -> Vec<SampleDocument> {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_documents(&self) -> usize {
        self.collections.lock().values().map(Vec::len).sum()
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unreachable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn ensure_index(&self, collection: &str) -> Result<(), StoreError> {
        validate_collection(collection)?;
        self.collections.lock().entry(collection.to_string()).or_default();
        *self.index_calls.lock().entry(collection.to_string()).or_default() += 1;
        Ok(())
    }

    async fn insert_many(&self, collection: &str, docs: &[SampleDocument]) -> Result<(), StoreError> {
        validate_collection(collection)?;
        self.before_write().await?;
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(docs);
        Ok(())
    }

    async fn upsert_watermark(&self, mark: &Watermark) -> Result<(), StoreError> {
        self.before_write().await?;
        self.watermarks.lock().insert(mark.name.clone(), mark.ts);
        Ok(())
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.collections.lock().keys().cloned().collect())
    }

    async fn query(&self, collection: &str, query: &SampleQuery) -> Result<Vec<SampleDocument>, StoreError> {
        let mut docs: Vec<SampleDocument> = self
            .documents(collection)
            .into_iter()
            .filter(|d| query.matches(d))
            .collect();
        docs.sort_by(|a, b| (a.ts, &a.target, &a.nid).cmp(&(b.ts, &b.target, &b.nid)));
        Ok(docs)
    }

    async fn watermark(&self, name: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.watermarks.lock().get(name).copied())
    }
}
