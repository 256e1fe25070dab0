use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lfsmon_types::time::elapsed_secs;
use lfsmon_types::{Clock, CounterDiff, CounterVector};

use crate::error::SnapshotError;
use crate::source::{AbsoluteCounters, CounterSource};

/// An absolute reading and when it was taken.
#[derive(Debug, Clone)]
struct Snapshot<V: CounterVector> {
    taken_at: DateTime<Utc>,
    counters: AbsoluteCounters<V>,
}

/// Rotating two-slot snapshot buffer for one target family.
///
/// The `old` slot holds the reading the next diff is taken against. Each
/// steady-state diff reads a fresh `new` slot, diffs it against `old` and
/// then rotates it into `old`. One engine belongs to one connection, so
/// concurrent callers never share slots.
pub struct SnapshotEngine<V: CounterVector> {
    source: Arc<dyn CounterSource<V>>,
    clock: Arc<dyn Clock>,
    old: Option<Snapshot<V>>,
}

impl<V: CounterVector> SnapshotEngine<V> {
    pub fn new(source: Arc<dyn CounterSource<V>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            old: None,
        }
    }

    /// `diff(initializing)`: a baseline when `initializing`, otherwise the
    /// validated diff since the previous call.
    pub fn diff(&mut self, initializing: bool) -> Result<Option<CounterDiff<V>>, SnapshotError> {
        if initializing {
            self.baseline()?;
            Ok(None)
        } else {
            self.diff_forward().map(Some)
        }
    }

    /// Read the current counters into the `old` slot.
    ///
    /// Returns the number of targets captured.
    pub fn baseline(&mut self) -> Result<usize, SnapshotError> {
        let snapshot = self.take()?;
        let targets = snapshot.counters.totals.len();
        tracing::debug!(role = %V::ROLE, targets, "baseline taken");
        self.old = Some(snapshot);
        Ok(targets)
    }

    /// Read the `new` slot, diff it against `old` and rotate.
    pub fn diff_forward(&mut self) -> Result<CounterDiff<V>, SnapshotError> {
        let Some(old) = self.old.as_ref() else {
            return Err(SnapshotError::NotInitialized(V::ROLE));
        };
        let new = self.take()?;
        let diff = compute_diff(old, &new);
        self.old = Some(new);
        Ok(diff)
    }

    pub fn has_baseline(&self) -> bool {
        self.old.is_some()
    }

    /// Targets in the `old` slot.
    pub fn tracked_targets(&self) -> usize {
        self.old.as_ref().map_or(0, |old| old.counters.totals.len())
    }

    fn take(&self) -> Result<Snapshot<V>, SnapshotError> {
        let counters = self.source.read()?;
        Ok(Snapshot {
            taken_at: self.clock.now(),
            counters,
        })
    }
}

/// Diff `new` against `old`.
///
/// Only targets present in `old` are considered. A target with any negative
/// element is dropped, one with all zeros omitted. Clients of a reported
/// target follow the same rule independently.
fn compute_diff<V: CounterVector>(old: &Snapshot<V>, new: &Snapshot<V>) -> CounterDiff<V> {
    let mut result = CounterDiff::empty(elapsed_secs(old.taken_at, new.taken_at));

    for (target, new_total) in &new.counters.totals {
        let Some(old_total) = old.counters.totals.get(target) else {
            continue;
        };
        let total_diff = new_total.diff(old_total);
        if total_diff.has_rollback() {
            tracing::info!(role = %V::ROLE, %target, "counter rollback, target dropped this cycle");
            continue;
        }
        if total_diff.is_zero() {
            continue;
        }
        result.totals.insert(target.clone(), total_diff);

        let (Some(new_clients), Some(old_clients)) = (
            new.counters.clients.get(target),
            old.counters.clients.get(target),
        ) else {
            continue;
        };
        let clients: BTreeMap<String, V> = new_clients
            .iter()
            .filter_map(|(nid, value)| {
                let old_value = old_clients.get(nid)?;
                value.reportable_diff(old_value).map(|d| (nid.clone(), d))
            })
            .collect();
        if !clients.is_empty() {
            result.clients.insert(target.clone(), clients);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use lfsmon_types::{ManualClock, MdsStats, OstStats, Role};

    const OST: &str = "fs-OST0000";
    const NID: &str = "10.0.0.1@o2ib";

    fn setup(initial: AbsoluteCounters<OstStats>) -> (Arc<MemorySource<OstStats>>, Arc<ManualClock>, SnapshotEngine<OstStats>) {
        let source = Arc::new(MemorySource::new(initial));
        let clock = Arc::new(ManualClock::at_secs(1000));
        let engine = SnapshotEngine::new(
            Arc::clone(&source) as Arc<dyn CounterSource<OstStats>>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (source, clock, engine)
    }

    fn ost(total: OstStats) -> AbsoluteCounters<OstStats> {
        AbsoluteCounters::default().with_target(OST, total)
    }

    #[test]
    fn test_forward_cycle_and_failover() {
        let (source, clock, mut engine) = setup(ost(OstStats::new(100, 2000, 10, 500)));
        assert!(engine.diff(true).unwrap().is_none());

        clock.set_secs(1005);
        source.set(ost(OstStats::new(150, 2500, 10, 500)));
        let d = engine.diff(false).unwrap().unwrap();
        assert_eq!(d.totals[OST], OstStats::new(50, 500, 0, 0));
        assert_eq!(d.elapsed_secs, 5.0);

        // Counter went backwards: the whole target disappears.
        clock.set_secs(1010);
        source.set(ost(OstStats::new(5, 2600, 10, 500)));
        let d = engine.diff(false).unwrap().unwrap();
        assert!(d.totals.is_empty());
        assert!(d.clients.is_empty());

        // The rolled-back reading is the new baseline.
        clock.set_secs(1015);
        source.set(ost(OstStats::new(7, 2600, 10, 500)));
        let d = engine.diff(false).unwrap().unwrap();
        assert_eq!(d.totals[OST], OstStats::new(2, 0, 0, 0));
    }

    #[test]
    fn test_zero_client_omitted_target_reported() {
        let (source, clock, mut engine) = setup(
            ost(OstStats::new(10, 10, 10, 10))
                .with_client(OST, NID, OstStats::new(1, 1, 1, 1))
                .with_client(OST, "10.0.0.2@o2ib", OstStats::new(1, 1, 1, 1)),
        );
        engine.baseline().unwrap();

        clock.advance_millis(10_000);
        source.set(
            ost(OstStats::new(20, 10, 10, 10))
                .with_client(OST, NID, OstStats::new(1, 1, 1, 1))
                .with_client(OST, "10.0.0.2@o2ib", OstStats::new(11, 1, 1, 1)),
        );
        let d = engine.diff_forward().unwrap();
        assert_eq!(d.totals[OST], OstStats::new(10, 0, 0, 0));
        let clients = &d.clients[OST];
        assert!(!clients.contains_key(NID));
        assert_eq!(clients["10.0.0.2@o2ib"], OstStats::new(10, 0, 0, 0));
    }

    #[test]
    fn test_client_rollback_dropped_independently() {
        let (source, clock, mut engine) = setup(
            ost(OstStats::new(10, 10, 10, 10))
                .with_client(OST, NID, OstStats::new(5, 5, 5, 5))
                .with_client(OST, "10.0.0.2@o2ib", OstStats::new(1, 1, 1, 1)),
        );
        engine.baseline().unwrap();
        clock.advance_millis(1000);
        source.set(
            ost(OstStats::new(20, 20, 10, 10))
                .with_client(OST, NID, OstStats::new(0, 9, 5, 5))
                .with_client(OST, "10.0.0.2@o2ib", OstStats::new(2, 1, 1, 1)),
        );
        let d = engine.diff_forward().unwrap();
        assert_eq!(d.clients[OST].len(), 1);
        assert!(d.clients[OST].contains_key("10.0.0.2@o2ib"));
    }

    #[test]
    fn test_new_target_and_new_client_skipped_until_next_cycle() {
        let (source, clock, mut engine) = setup(ost(OstStats::new(1, 1, 1, 1)));
        engine.baseline().unwrap();

        clock.advance_millis(1000);
        source.set(
            ost(OstStats::new(2, 1, 1, 1))
                .with_target("fs-OST0001", OstStats::new(50, 50, 50, 50))
                .with_client(OST, NID, OstStats::new(9, 9, 9, 9)),
        );
        let d = engine.diff_forward().unwrap();
        assert_eq!(d.totals.len(), 1);
        assert!(d.clients.is_empty());

        clock.advance_millis(1000);
        source.set(
            ost(OstStats::new(3, 1, 1, 1))
                .with_target("fs-OST0001", OstStats::new(51, 50, 50, 50))
                .with_client(OST, NID, OstStats::new(10, 9, 9, 9)),
        );
        let d = engine.diff_forward().unwrap();
        assert_eq!(d.totals.len(), 2);
        assert_eq!(d.clients[OST][NID], OstStats::new(1, 0, 0, 0));
    }

    #[test]
    fn test_elapsed_reflects_stall_not_nominal_interval() {
        let (source, clock, mut engine) = setup(ost(OstStats::default()));
        engine.baseline().unwrap();

        // Nominal interval would be 10s; the caller stalled for 37.5s.
        clock.advance_millis(37_500);
        source.set(ost(OstStats::new(1, 0, 0, 0)));
        assert_eq!(engine.diff_forward().unwrap().elapsed_secs, 37.5);

        clock.advance_millis(10_000);
        source.set(ost(OstStats::new(2, 0, 0, 0)));
        assert_eq!(engine.diff_forward().unwrap().elapsed_secs, 10.0);
    }

    #[test]
    fn test_diff_before_baseline() {
        let (_source, _clock, mut engine) = setup(ost(OstStats::default()));
        assert_eq!(
            engine.diff(false).unwrap_err(),
            SnapshotError::NotInitialized(Role::Oss)
        );
        assert!(!engine.has_baseline());
    }

    #[test]
    fn test_unsupported_role() {
        let source: Arc<dyn CounterSource<MdsStats>> = Arc::new(MemorySource::unavailable());
        let mut engine = SnapshotEngine::new(source, Arc::new(ManualClock::at_secs(0)));
        assert_eq!(
            engine.diff(true).unwrap_err(),
            SnapshotError::UnsupportedRole(Role::Mds)
        );
    }
}
