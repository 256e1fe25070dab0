//! Per-node timing of the collection and persistence phases.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PhaseSample {
    duration: Duration,
    items: usize,
}

#[derive(Default)]
struct StatsInner {
    collect: HashMap<String, PhaseSample>,
    insert: HashMap<String, PhaseSample>,
}

/// Aggregate over the latest cycle of every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub nodes: usize,
    pub max: Duration,
    pub avg: Duration,
    pub items: usize,
    pub slowest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSummary {
    pub collect: PhaseSummary,
    pub insert: PhaseSummary,
}

/// Latest cycle duration and item count per node, for both phases.
///
/// Purely observational; nothing reads it to make a scheduling decision.
#[derive(Default)]
pub struct StatsCollector {
    inner: Mutex<StatsInner>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_collect(&self, node: &str, duration: Duration, items: usize) {
        self.inner
            .lock()
            .collect
            .insert(node.to_string(), PhaseSample { duration, items });
    }

    pub fn record_insert(&self, node: &str, duration: Duration, items: usize) {
        self.inner
            .lock()
            .insert
            .insert(node.to_string(), PhaseSample { duration, items });
    }

    pub fn summary(&self) -> StatsSummary {
        let inner = self.inner.lock();
        StatsSummary {
            collect: summarize(&inner.collect),
            insert: summarize(&inner.insert),
        }
    }

    pub fn log_summary(&self) {
        let s = self.summary();
        if s.collect.nodes == 0 && s.insert.nodes == 0 {
            return;
        }
        tracing::info!(
            nodes = s.collect.nodes,
            collect_max_ms = s.collect.max.as_millis() as u64,
            collect_avg_ms = s.collect.avg.as_millis() as u64,
            collect_items = s.collect.items,
            slowest_collect = s.collect.slowest.as_deref().unwrap_or("-"),
            insert_max_ms = s.insert.max.as_millis() as u64,
            insert_avg_ms = s.insert.avg.as_millis() as u64,
            insert_items = s.insert.items,
            slowest_insert = s.insert.slowest.as_deref().unwrap_or("-"),
            "cycle summary"
        );
    }
}

fn summarize(samples: &HashMap<String, PhaseSample>) -> PhaseSummary {
    if samples.is_empty() {
        return PhaseSummary::default();
    }
    let total: Duration = samples.values().map(|s| s.duration).sum();
    let slowest = samples
        .iter()
        .max_by(|(a_node, a), (b_node, b)| a.duration.cmp(&b.duration).then_with(|| b_node.cmp(a_node)));
    PhaseSummary {
        nodes: samples.len(),
        max: slowest.map(|(_, s)| s.duration).unwrap_or_default(),
        avg: total / samples.len() as u32,
        items: samples.values().map(|s| s.items).sum(),
        slowest: slowest.map(|(node, _)| node.clone()),
    }
}
