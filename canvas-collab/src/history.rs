//! Bounded log of applied operations plus the applied-opId index.
//!
//! The coordinator transforms a late operation against every entry newer
//! than its base version, so the log must hold a contiguous run of
//! versions ending at the current one. Retention is "at least `min_ops`
//! entries and at least `min_age` of history": an entry is pruned only
//! when both bounds are exceeded.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use canvas_core::{AppliedOp, OpId};

#[derive(Debug, Clone)]
struct LogEntry {
    applied: AppliedOp,
    at: Instant,
}

#[derive(Debug)]
pub struct OpLog {
    entries: VecDeque<LogEntry>,
    /// op id -> version it resolved to (for no-ops, the version current
    /// at the time).
    applied_ids: HashMap<OpId, u64>,
    id_order: VecDeque<(OpId, Instant)>,
    current: u64,
    min_ops: usize,
    min_age: Duration,
}

impl OpLog {
    /// Empty log for an artboard currently at `version`.
    pub fn new(version: u64, min_ops: usize, min_age: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            applied_ids: HashMap::new(),
            id_order: VecDeque::new(),
            current: version,
            min_ops,
            min_age,
        }
    }

    /// Record an applied operation. Versions must arrive contiguously.
    pub fn record(&mut self, applied: AppliedOp, now: Instant) {
        debug_assert_eq!(applied.version, self.current + 1);
        self.current = applied.version;
        self.remember(applied.op.op_id.clone(), applied.version, now);
        self.entries.push_back(LogEntry { applied, at: now });
    }

    /// Record an operation that was transformed away. It gets no log
    /// entry but resubmissions must still be recognised.
    pub fn record_noop(&mut self, op_id: OpId, now: Instant) {
        self.remember(op_id, self.current, now);
    }

    fn remember(&mut self, op_id: OpId, version: u64, now: Instant) {
        if self.applied_ids.insert(op_id.clone(), version).is_none() {
            self.id_order.push_back((op_id, now));
        }
    }

    /// Version an op id resolved to, if it is still remembered.
    pub fn lookup(&self, op_id: &str) -> Option<u64> {
        self.applied_ids.get(op_id).copied()
    }

    /// Oldest base version that can still be transformed to the present.
    pub fn floor(&self) -> u64 {
        self.entries
            .front()
            .map_or(self.current, |e| e.applied.version - 1)
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Applied operations with version greater than `base`, in order.
    pub fn since(&self, base: u64) -> impl Iterator<Item = &AppliedOp> {
        self.entries
            .iter()
            .map(|e| &e.applied)
            .skip_while(move |a| a.version <= base)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries and op ids that are beyond both retention bounds.
    /// Returns the number of log entries removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let mut pruned = 0;
        while self.entries.len() > self.min_ops {
            match self.entries.front() {
                Some(e) if now.saturating_duration_since(e.at) > self.min_age => {
                    self.entries.pop_front();
                    pruned += 1;
                }
                _ => break,
            }
        }
        while self.id_order.len() > self.min_ops {
            match self.id_order.front() {
                Some((_, at)) if now.saturating_duration_since(*at) > self.min_age => {
                    if let Some((op_id, _)) = self.id_order.pop_front() {
                        self.applied_ids.remove(&op_id);
                    }
                }
                _ => break,
            }
        }
        if pruned > 0 {
            log::debug!("op log pruned {pruned} entries, floor now {}", self.floor());
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_core::{Artboard, CanvasObject, Operation};
    use uuid::Uuid;

    /// Apply `n` inserts and return the applied records.
    fn applied_ops(n: usize) -> Vec<AppliedOp> {
        let mut board = Artboard::new(Uuid::new_v4(), 100.0, 100.0);
        let client = Uuid::new_v4();
        (0..n)
            .map(|i| {
                let obj = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
                let op = Operation::insert(format!("op-{i}"), board.id(), client, board.version(), obj, i);
                board.apply(&op).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_empty_log_floor_is_current() {
        let log = OpLog::new(37, 500, Duration::from_secs(600));
        assert_eq!(log.floor(), 37);
        assert_eq!(log.since(37).count(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_since_returns_newer_entries_in_order() {
        let now = Instant::now();
        let mut log = OpLog::new(0, 500, Duration::from_secs(600));
        for applied in applied_ops(5) {
            log.record(applied, now);
        }
        let versions: Vec<u64> = log.since(2).map(|a| a.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
        assert_eq!(log.floor(), 0);
        assert_eq!(log.current(), 5);
    }

    #[test]
    fn test_lookup_applied_and_noop_ids() {
        let now = Instant::now();
        let mut log = OpLog::new(0, 500, Duration::from_secs(600));
        for applied in applied_ops(2) {
            log.record(applied, now);
        }
        log.record_noop("lost-update".into(), now);
        assert_eq!(log.lookup("op-0"), Some(1));
        assert_eq!(log.lookup("op-1"), Some(2));
        assert_eq!(log.lookup("lost-update"), Some(2));
        assert_eq!(log.lookup("never-seen"), None);
    }

    #[test]
    fn test_prune_needs_both_bounds_exceeded() {
        let start = Instant::now();
        let mut log = OpLog::new(0, 3, Duration::from_secs(600));
        for applied in applied_ops(5) {
            log.record(applied, start);
        }

        // Over the count bound but still young: nothing goes.
        assert_eq!(log.prune(start + Duration::from_secs(60)), 0);
        assert_eq!(log.len(), 5);

        // Old enough: trimmed back to the count bound.
        assert_eq!(log.prune(start + Duration::from_secs(601)), 2);
        assert_eq!(log.len(), 3);
        assert_eq!(log.floor(), 2);
        assert_eq!(log.lookup("op-0"), None);
        assert_eq!(log.lookup("op-4"), Some(5));
    }

    #[test]
    fn test_prune_keeps_min_ops_when_old() {
        let start = Instant::now();
        let mut log = OpLog::new(0, 10, Duration::ZERO);
        for applied in applied_ops(4) {
            log.record(applied, start);
        }
        assert_eq!(log.prune(start + Duration::from_secs(3600)), 0);
        assert_eq!(log.floor(), 0);
    }
}
