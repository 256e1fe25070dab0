use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::counters::CounterVector;

/// Per-target, per-client counters: `target -> client nid -> vector`.
pub type ClientCounters<V> = BTreeMap<String, BTreeMap<String, V>>;

/// The validated difference between two absolute snapshots of one node.
///
/// This is what the node-side engine returns; it carries no aligned
/// timestamp because the node's clock is not trusted for alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "V: CounterVector")]
pub struct CounterDiff<V: CounterVector> {
    /// Wall-clock seconds between the two snapshots.
    pub elapsed_secs: f64,
    pub totals: BTreeMap<String, V>,
    #[serde(default)]
    pub clients: ClientCounters<V>,
}

impl<V: CounterVector> CounterDiff<V> {
    pub fn empty(elapsed_secs: f64) -> Self {
        Self {
            elapsed_secs,
            totals: BTreeMap::new(),
            clients: BTreeMap::new(),
        }
    }
}

/// A rate sample for one node and one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "V: CounterVector")]
pub struct Sample<V: CounterVector> {
    /// Node the sample was read from.
    pub node: String,
    /// Wall time rounded down to the snap interval, unix seconds.
    pub timestamp: i64,
    /// Real time between the snapshots the diff was taken from.
    pub elapsed_secs: f64,
    pub totals: BTreeMap<String, V>,
    pub clients: ClientCounters<V>,
}

impl<V: CounterVector> Sample<V> {
    pub fn from_diff(node: impl Into<String>, timestamp: i64, diff: CounterDiff<V>) -> Self {
        Self {
            node: node.into(),
            timestamp,
            elapsed_secs: diff.elapsed_secs,
            totals: diff.totals,
            clients: diff.clients,
        }
    }

    /// Number of records this sample expands to: one per target plus one per client.
    pub fn item_count(&self) -> usize {
        self.totals.len() + self.clients.values().map(|c| c.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty() && self.clients.values().all(|c| c.is_empty())
    }
}
