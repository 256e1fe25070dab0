use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::document::{validate_collection, SampleDocument, SampleQuery, Watermark};
use crate::error::StoreError;
use crate::sink::DocumentSink;

const WATERMARK_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS watermark (
    name TEXT PRIMARY KEY,
    ts INTEGER NOT NULL
);
";

fn collection_schema(collection: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{collection}\" (
            ts INTEGER NOT NULL,
            target_kind TEXT NOT NULL,
            target TEXT NOT NULL,
            nid TEXT NOT NULL,
            v TEXT NOT NULL,
            dt REAL NOT NULL
        );"
    )
}

fn index_schema(collection: &str) -> String {
    format!("CREATE INDEX IF NOT EXISTS \"idx_{collection}_ts_nid\" ON \"{collection}\"(ts, nid);")
}

/// A database file holding one table per collection plus the watermark.
///
/// Every statement runs on the blocking pool.
pub struct SqliteSink {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteSink {
    /// Open `<dir>/<name>.db`, creating the directory if needed.
    pub fn open(dir: &Path, name: &str) -> Result<Self, StoreError> {
        validate_collection(name)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.db"));
        let conn = Self::connect(&path)?;
        tracing::info!(path = %path.display(), "sqlite sink opened");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unreachable(format!("{}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(WATERMARK_SCHEMA)?;
        Ok(conn)
    }

    async fn with_conn<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| StoreError::Unreachable("connection closed".into()))?;
            f(conn)
        })
        .await
        .map_err(|e| StoreError::Io(e.into()))?
    }
}

#[async_trait]
impl DocumentSink for SqliteSink {
    async fn ensure_index(&self, collection: &str) -> Result<(), StoreError> {
        validate_collection(collection)?;
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&collection_schema(&collection))?;
            conn.execute_batch(&index_schema(&collection))?;
            Ok(())
        })
        .await
    }

    async fn insert_many(&self, collection: &str, docs: &[SampleDocument]) -> Result<(), StoreError> {
        validate_collection(collection)?;
        if docs.is_empty() {
            return Ok(());
        }
        let collection = collection.to_string();
        let docs = docs.to_vec();
        self.with_conn(move |conn| {
            conn.execute_batch(&collection_schema(&collection))?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO \"{collection}\" (ts, target_kind, target, nid, v, dt) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ))?;
                for doc in &docs {
                    let v = serde_json::to_string(&doc.v)?;
                    stmt.execute(params![doc.ts, doc.target_kind, doc.target, doc.nid, v, doc.dt])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn upsert_watermark(&self, mark: &Watermark) -> Result<(), StoreError> {
        let mark = mark.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO watermark (name, ts) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET ts = excluded.ts",
                params![mark.name, mark.ts],
            )?;
            Ok(())
        })
        .await
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            // Close before reopening so a broken handle is never reused.
            guard.take();
            *guard = Some(Self::connect(&path)?);
            tracing::info!(path = %path.display(), "sqlite sink reconnected");
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Io(e.into()))?
    }

    async fn collections(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name != 'watermark' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn query(&self, collection: &str, query: &SampleQuery) -> Result<Vec<SampleDocument>, StoreError> {
        validate_collection(collection)?;
        let mut sql = format!(
            "SELECT ts, target_kind, target, nid, v, dt FROM \"{collection}\" WHERE ts >= ?1 AND ts <= ?2"
        );
        let mut values = vec![Value::Integer(query.from), Value::Integer(query.to)];
        if let Some(kind) = &query.target_kind {
            values.push(Value::Text(kind.clone()));
            sql.push_str(&format!(" AND target_kind = ?{}", values.len()));
        }
        if !query.nids.is_empty() {
            let first = values.len() + 1;
            let placeholders: Vec<String> = (first..first + query.nids.len())
                .map(|i| format!("?{i}"))
                .collect();
            sql.push_str(&format!(" AND nid IN ({})", placeholders.join(", ")));
            values.extend(query.nids.iter().cloned().map(Value::Text));
        }
        sql.push_str(" ORDER BY ts, target, nid");

        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [&collection],
                |row| row.get(0),
            )?;
            if !exists {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, f64>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(ts, target_kind, target, nid, v, dt)| -> Result<SampleDocument, StoreError> {
                    Ok(SampleDocument {
                        ts,
                        target_kind,
                        target,
                        nid,
                        v: serde_json::from_str(&v)?,
                        dt,
                    })
                })
                .collect()
        })
        .await
    }

    async fn watermark(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT ts FROM watermark WHERE name = ?1")?;
            let mut rows = stmt.query_map([&name], |row| row.get::<_, i64>(0))?;
            Ok(rows.next().transpose()?)
        })
        .await
    }
}
