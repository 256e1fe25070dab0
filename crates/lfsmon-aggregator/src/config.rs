//! Configuration of the aggregating process.
//!
//! Every field has a serde default so a partial file is valid; cross-field
//! rules are checked by [`Config::validate`].

use std::path::PathBuf;

use lfsmon_config::{invalid, Config, ConfigError};
use lfsmon_logging::LogConfig;
use lfsmon_types::Role;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default port of the node collector.
pub const DEFAULT_NODE_PORT: u16 = 8888;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub nidmapping: NidMappingConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// What to poll and how often.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Filesystem name, the prefix of every collection.
    #[serde(default = "default_fsname")]
    pub fsname: String,

    /// Object storage servers, `host` or `host:port`.
    #[serde(default)]
    pub oss: Vec<String>,

    /// Metadata servers, `host` or `host:port`.
    #[serde(default)]
    pub mds: Vec<String>,

    /// Port used for nodes listed without one.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Depth of each node's sample queue.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Granularity of aligned timestamps, seconds.
    #[serde(default = "default_interval")]
    pub snap_interval: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Endpoint of the read-only query service; not served when unset.
    #[serde(default)]
    pub query_listen: Option<String>,
}

fn default_fsname() -> String {
    "lustre".to_string()
}

fn default_port() -> u16 {
    DEFAULT_NODE_PORT
}

fn default_max_entries() -> usize {
    100
}

fn default_interval() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            fsname: default_fsname(),
            oss: Vec::new(),
            mds: Vec::new(),
            port: default_port(),
            max_entries: default_max_entries(),
            interval: default_interval(),
            snap_interval: default_interval(),
            retry_delay_ms: default_retry_delay_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            query_listen: None,
        }
    }
}

impl CollectorConfig {
    /// `(role, address)` of every node, metadata servers first.
    pub fn nodes(&self) -> Vec<(Role, String)> {
        let mds = self.mds.iter().map(|n| (Role::Mds, self.address_of(n)));
        let oss = self.oss.iter().map(|n| (Role::Oss, self.address_of(n)));
        mds.chain(oss).collect()
    }

    /// `node` with the default port appended when it has none.
    pub fn address_of(&self, node: &str) -> String {
        if node.contains(':') {
            node.to_string()
        } else {
            format!("{}:{}", node, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Memory,
}

/// How documents reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistPolicy {
    /// Write in the node's writer task, retrying a bounded number of times.
    Sync,
    /// Hand off to a bounded background queue; drop when full.
    Queued,
    /// Accumulate and write in batches.
    Batched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Directory holding the SQLite file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Database name; one watermark per name.
    #[serde(default = "default_fsname")]
    pub name: String,

    #[serde(default = "default_policy")]
    pub policy: PersistPolicy,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_db_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Background queue depth for the queued and batched policies.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_backend() -> Backend {
    Backend::Sqlite
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/lfsmon")
}

fn default_policy() -> PersistPolicy {
    PersistPolicy::Sync
}

fn default_retry_count() -> u32 {
    120
}

fn default_db_retry_delay_ms() -> u64 {
    5000
}

fn default_queue_depth() -> usize {
    1024
}

fn default_batch_size() -> usize {
    256
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            name: default_fsname(),
            policy: default_policy(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_db_retry_delay_ms(),
            queue_depth: default_queue_depth(),
            batch_size: default_batch_size(),
        }
    }
}

/// Client id rewriting applied before storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NidMappingConfig {
    /// `/etc/hosts`-style file mapping addresses to names.
    #[serde(default)]
    pub hostfile: Option<PathBuf>,

    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub replace: String,
}

impl Config for AggregatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collector;
        if c.oss.is_empty() && c.mds.is_empty() {
            return invalid("collector: no oss or mds nodes configured");
        }
        if c.interval == 0 {
            return invalid("collector.interval must be at least 1");
        }
        if c.snap_interval == 0 {
            return invalid("collector.snap_interval must be at least 1");
        }
        if c.max_entries == 0 {
            return invalid("collector.max_entries must be at least 1");
        }
        if c.fsname.is_empty() || !c.fsname.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return invalid(format!("collector.fsname {:?} must be [A-Za-z0-9_]+", c.fsname));
        }
        let db = &self.database;
        if db.policy == PersistPolicy::Batched && db.batch_size == 0 {
            return invalid("database.batch_size must be at least 1");
        }
        if db.policy == PersistPolicy::Queued && db.queue_depth == 0 {
            return invalid("database.queue_depth must be at least 1");
        }
        if let Some(pattern) = &self.nidmapping.pattern {
            if let Err(e) = Regex::new(pattern) {
                return invalid(format!("nidmapping.pattern: {e}"));
            }
        }
        Ok(())
    }
}
