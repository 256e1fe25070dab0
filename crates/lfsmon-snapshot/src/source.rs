use std::collections::BTreeMap;

use lfsmon_types::{ClientCounters, CounterVector};
use parking_lot::Mutex;

use crate::error::SnapshotError;

/// One absolute reading of every target and client counter of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct AbsoluteCounters<V: CounterVector> {
    pub totals: BTreeMap<String, V>,
    pub clients: ClientCounters<V>,
}

impl<V: CounterVector> Default for AbsoluteCounters<V> {
    fn default() -> Self {
        Self {
            totals: BTreeMap::new(),
            clients: BTreeMap::new(),
        }
    }
}

impl<V: CounterVector> AbsoluteCounters<V> {
    pub fn with_target(mut self, target: &str, total: V) -> Self {
        self.totals.insert(target.to_string(), total);
        self
    }

    pub fn with_client(mut self, target: &str, nid: &str, value: V) -> Self {
        self.clients
            .entry(target.to_string())
            .or_default()
            .insert(nid.to_string(), value);
        self
    }
}

/// Where cumulative counters of one family come from.
pub trait CounterSource<V: CounterVector>: Send + Sync {
    /// Whether this node hosts the family at all.
    fn is_available(&self) -> bool;

    /// Names of the targets currently visible.
    fn list_targets(&self) -> Result<Vec<String>, SnapshotError>;

    /// Read every target and client counter once.
    ///
    /// Missing individual counter files read as zero.
    fn read(&self) -> Result<AbsoluteCounters<V>, SnapshotError>;
}

/// Counters held in memory; `None` means the role is not hosted.
pub struct MemorySource<V: CounterVector> {
    current: Mutex<Option<AbsoluteCounters<V>>>,
}

impl<V: CounterVector> MemorySource<V> {
    pub fn new(counters: AbsoluteCounters<V>) -> Self {
        Self {
            current: Mutex::new(Some(counters)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Replace what the next read returns.
    pub fn set(&self, counters: AbsoluteCounters<V>) {
        *self.current.lock() = Some(counters);
    }
}

impl<V: CounterVector> CounterSource<V> for MemorySource<V> {
    fn is_available(&self) -> bool {
        self.current.lock().is_some()
    }

    fn list_targets(&self) -> Result<Vec<String>, SnapshotError> {
        Ok(self.read()?.totals.into_keys().collect())
    }

    fn read(&self) -> Result<AbsoluteCounters<V>, SnapshotError> {
        self.current
            .lock()
            .clone()
            .ok_or(SnapshotError::UnsupportedRole(V::ROLE))
    }
}
