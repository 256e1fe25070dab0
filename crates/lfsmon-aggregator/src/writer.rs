//! Turns samples into stored documents.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use lfsmon_store::{CollectionName, DocumentSink, SampleDocument, Watermark, AGGREGATE_NID};
use lfsmon_types::{CounterVector, Sample};
use parking_lot::Mutex;

use crate::error::CollectError;
use crate::nid::NidNormalizer;
use crate::persist::SamplePersister;
use crate::stats::StatsCollector;

/// Collections whose index was created by this process.
#[derive(Default)]
pub struct IndexedCollections {
    done: Mutex<HashSet<String>>,
}

impl IndexedCollections {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` for exactly one caller per collection until [`release`](Self::release).
    fn claim(&self, collection: &str) -> bool {
        self.done.lock().insert(collection.to_string())
    }

    fn release(&self, collection: &str) {
        self.done.lock().remove(collection);
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.done.lock().contains(collection)
    }
}

/// Highest watermark issued by any writer of this process.
///
/// Storage-server writers finish a cycle at different times; a slow one
/// must not move the stored watermark backwards.
#[derive(Debug, Default)]
pub struct LatestMark(AtomicI64);

impl LatestMark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the mark to `ts`; never lowers it.
    fn advance(&self, ts: i64) {
        self.0.fetch_max(ts, Ordering::SeqCst);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PersistenceWriter {
    fsname: String,
    sink: Arc<dyn DocumentSink>,
    persister: Arc<dyn SamplePersister>,
    nids: Arc<NidNormalizer>,
    indexed: Arc<IndexedCollections>,
    stats: Arc<StatsCollector>,
    watermark: Option<Arc<LatestMark>>,
}

impl PersistenceWriter {
    pub fn new(
        fsname: impl Into<String>,
        sink: Arc<dyn DocumentSink>,
        persister: Arc<dyn SamplePersister>,
        nids: Arc<NidNormalizer>,
        indexed: Arc<IndexedCollections>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            fsname: fsname.into(),
            sink,
            persister,
            nids,
            indexed,
            stats,
            watermark: None,
        }
    }

    /// Make this writer upsert the watermark after each cycle it stores.
    pub fn advancing_watermark(mut self, mark: Arc<LatestMark>) -> Self {
        self.watermark = Some(mark);
        self
    }

    /// One aggregate row per target, then one row per active client.
    pub fn documents<V: CounterVector>(&self, sample: &Sample<V>) -> Vec<SampleDocument> {
        let kind = V::ROLE.target_kind();
        let doc = |target: &str, nid: String, value: &V| SampleDocument {
            ts: sample.timestamp,
            target_kind: kind.to_string(),
            target: target.to_string(),
            nid,
            v: value.elements(),
            dt: sample.elapsed_secs,
        };
        let mut docs = Vec::with_capacity(sample.item_count());
        for (target, total) in &sample.totals {
            docs.push(doc(target.as_str(), AGGREGATE_NID.to_string(), total));
            if let Some(clients) = sample.clients.get(target) {
                for (nid, value) in clients {
                    docs.push(doc(target.as_str(), self.nids.normalize(nid), value));
                }
            }
        }
        docs
    }

    /// Store one sample, then advance the watermark if this writer owns it.
    ///
    /// Returns the number of documents written.
    pub async fn write<V: CounterVector>(&self, sample: &Sample<V>) -> Result<usize, CollectError> {
        let started = Instant::now();
        let collection = CollectionName::for_timestamp(&self.fsname, sample.timestamp).to_string();
        self.ensure_index(&collection).await;

        let docs = self.documents(sample);
        let items = docs.len();
        let result = async {
            if !docs.is_empty() {
                self.persister.insert(&collection, docs).await?;
            }
            // The mark moves only once the upsert was accepted, so a failed
            // one is retried by the next writer of the same cycle.
            if let Some(mark) = &self.watermark {
                if sample.timestamp > mark.get() {
                    self.persister.update(Watermark::latest(sample.timestamp)).await?;
                    mark.advance(sample.timestamp);
                }
            }
            Ok(items)
        }
        .await;
        self.stats.record_insert(&sample.node, started.elapsed(), items);
        result
    }

    async fn ensure_index(&self, collection: &str) {
        if !self.indexed.claim(collection) {
            return;
        }
        match self.sink.ensure_index(collection).await {
            Ok(()) => tracing::info!(collection, "collection index created"),
            Err(e) => {
                tracing::warn!(collection, error = %e, "index creation failed, will retry");
                self.indexed.release(collection);
            }
        }
    }
}
