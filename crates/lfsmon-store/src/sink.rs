use async_trait::async_trait;

use crate::document::{SampleDocument, SampleQuery, Watermark};
use crate::error::StoreError;

/// Insert/update/query port onto a document store.
///
/// Collections are created implicitly by the first insert; indexes only
/// by [`DocumentSink::ensure_index`].
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Create `collection` if needed and its `(ts, nid)` index.
    async fn ensure_index(&self, collection: &str) -> Result<(), StoreError>;

    async fn insert_many(&self, collection: &str, docs: &[SampleDocument]) -> Result<(), StoreError>;

    /// Replace the watermark record with the same name.
    async fn upsert_watermark(&self, mark: &Watermark) -> Result<(), StoreError>;

    /// Drop and re-establish the underlying connection.
    async fn refresh(&self) -> Result<(), StoreError>;

    async fn collections(&self) -> Result<Vec<String>, StoreError>;

    async fn query(&self, collection: &str, query: &SampleQuery) -> Result<Vec<SampleDocument>, StoreError>;

    async fn watermark(&self, name: &str) -> Result<Option<i64>, StoreError>;
}
