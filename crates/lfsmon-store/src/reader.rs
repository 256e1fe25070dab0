use std::sync::Arc;

use crate::document::{CollectionName, SampleDocument, SampleQuery, WATERMARK_NAME};
use crate::error::StoreError;
use crate::sink::DocumentSink;

/// Read API for consumers of stored samples.
///
/// Queries fan out over every month collection of the filesystem that
/// intersects the time range.
pub struct SampleReader {
    sink: Arc<dyn DocumentSink>,
    fsname: String,
}

impl SampleReader {
    pub fn new(sink: Arc<dyn DocumentSink>, fsname: impl Into<String>) -> Self {
        Self {
            sink,
            fsname: fsname.into(),
        }
    }

    /// Documents with `ts` in `[from, to]` and `nid` in `query.nids`,
    /// ordered by `(ts, target, nid)`.
    pub async fn query(&self, query: &SampleQuery) -> Result<Vec<SampleDocument>, StoreError> {
        let mut docs = Vec::new();
        for name in self.sink.collections().await? {
            let covered = CollectionName::parse(&name)
                .is_some_and(|c| c.fsname == self.fsname && c.overlaps(query.from, query.to));
            if covered {
                docs.extend(self.sink.query(&name, query).await?);
            }
        }
        docs.sort_by(|a, b| (a.ts, &a.target, &a.nid).cmp(&(b.ts, &b.target, &b.nid)));
        Ok(docs)
    }

    /// Latest aligned timestamp whose cycle is completely written.
    pub async fn latest_watermark(&self) -> Result<Option<i64>, StoreError> {
        self.sink.watermark(WATERMARK_NAME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Watermark;
    use crate::memory::MemorySink;

    fn doc(ts: i64, nid: &str) -> SampleDocument {
        SampleDocument {
            ts,
            target_kind: "mdt".into(),
            target: "fs-MDT0000".into(),
            nid: nid.into(),
            v: vec![1, 0, 0, 0],
            dt: 60.0,
        }
    }

    #[tokio::test]
    async fn test_query_spans_months() {
        let sink = Arc::new(MemorySink::new());
        // 2024-01-31T23:59:00Z and 2024-02-01T00:01:00Z
        sink.insert_many("fs012024", &[doc(1_706_745_540, "n1")]).await.unwrap();
        sink.insert_many("fs022024", &[doc(1_706_745_660, "n1"), doc(1_706_745_660, "n2")])
            .await
            .unwrap();
        sink.insert_many("other022024", &[doc(1_706_745_660, "n1")]).await.unwrap();

        let reader = SampleReader::new(sink.clone(), "fs");
        let docs = reader
            .query(&SampleQuery::new(1_706_745_000, 1_706_746_000).with_nids(["n1"]))
            .await
            .unwrap();
        assert_eq!(docs, vec![doc(1_706_745_540, "n1"), doc(1_706_745_660, "n1")]);
    }

    #[tokio::test]
    async fn test_open_ended_query_reaches_every_month() {
        let sink = Arc::new(MemorySink::new());
        // 2024-03-15T12:00:00Z and 2031-07-01T00:00:00Z
        sink.insert_many("fs032024", &[doc(1_710_504_000, "n1")]).await.unwrap();
        sink.insert_many("fs072031", &[doc(1_940_630_400, "n1")]).await.unwrap();
        sink.insert_many("fs2032024", &[doc(1_710_504_000, "n1")]).await.unwrap();

        let reader = SampleReader::new(sink.clone(), "fs");
        let docs = reader.query(&SampleQuery::new(0, i64::MAX)).await.unwrap();
        assert_eq!(docs, vec![doc(1_710_504_000, "n1"), doc(1_940_630_400, "n1")]);
        let docs = reader.query(&SampleQuery::new(1_800_000_000, i64::MAX)).await.unwrap();
        assert_eq!(docs, vec![doc(1_940_630_400, "n1")]);
    }

    #[tokio::test]
    async fn test_latest_watermark() {
        let sink = Arc::new(MemorySink::new());
        let reader = SampleReader::new(sink.clone(), "fs");
        assert_eq!(reader.latest_watermark().await.unwrap(), None);
        sink.upsert_watermark(&Watermark::latest(600)).await.unwrap();
        assert_eq!(reader.latest_watermark().await.unwrap(), Some(600));
    }
}
