//! Master-side worker bookkeeping.
//!
//! Pure state transitions, separated from forking and signaling so the
//! dead-worker dispatch rules are testable without child processes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use workerman_common::{ProcessHash, WorkerId};

/// Master-side record of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub hash: ProcessHash,
    pub listener_index: usize,
    pub restart_count: u32,
    pub start_time: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, listener_index: usize) -> Self {
        Self {
            id,
            hash: ProcessHash::new(Uuid::new_v4().simple().to_string()),
            listener_index,
            restart_count: 0,
            start_time: Utc::now(),
        }
    }
}

/// What the master expects the next reaped child to mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadWorkerDisposition {
    /// No planned exits; a reap is an unexpected crash.
    #[default]
    None,
    /// A stop is in flight; reaped workers are removed.
    Stop,
    /// A reload is in flight; reaped workers are replaced.
    Reload,
}

/// Outcome of dispatching one reaped child.
#[derive(Debug)]
pub enum ReapOutcome {
    /// Crash during normal operation: revive with the returned record
    /// (restart count already incremented).
    Unexpected { record: WorkerRecord },
    /// Planned stop, clean exit: record removed.
    StoppedClean { record: WorkerRecord },
    /// Planned stop, non-zero exit: record removed once, logged, never
    /// revived.
    StoppedDirty { record: WorkerRecord, status: i32 },
    /// Planned reload: revive with the returned record, keeping its id,
    /// hash, and restart count. `status` is non-zero on a dirty exit.
    ReloadReplace { record: WorkerRecord, status: i32 },
    /// The pid does not belong to this table.
    Unknown,
}

/// The worker maps of the master state.
#[derive(Debug, Default)]
pub struct WorkerTable {
    workers: HashMap<i32, WorkerRecord>,
    pending_stop: HashMap<i32, WorkerRecord>,
    next_id: u32,
    disposition: DeadWorkerDisposition,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next worker id. Ids start at 1 and are strictly
    /// increasing over the master's lifetime.
    pub fn allocate_id(&mut self) -> WorkerId {
        self.next_id += 1;
        WorkerId::new(self.next_id)
    }

    pub fn insert(&mut self, pid: i32, record: WorkerRecord) {
        self.workers.insert(pid, record);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn pids(&self) -> Vec<i32> {
        self.workers.keys().copied().collect()
    }

    /// Worker hashes in id order, for the rendezvous hash lists.
    pub fn hashes(&self) -> Vec<ProcessHash> {
        let mut records: Vec<&WorkerRecord> = self.workers.values().collect();
        records.sort_by_key(|record| record.id);
        records.iter().map(|record| record.hash.clone()).collect()
    }

    pub fn disposition(&self) -> DeadWorkerDisposition {
        self.disposition
    }

    pub fn set_disposition(&mut self, disposition: DeadWorkerDisposition) {
        self.disposition = disposition;
    }

    /// Snapshots the live workers into the pending-stop map.
    pub fn snapshot_pending(&mut self) {
        self.pending_stop = self.workers.clone();
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending_stop.is_empty()
    }

    /// Dispatches one reaped child according to the current disposition.
    ///
    /// A pid never remains in both maps: the worker entry is removed here,
    /// and the pending entry (when present) is removed in the same step.
    pub fn on_reaped(&mut self, pid: i32, status: i32) -> ReapOutcome {
        let Some(mut record) = self.workers.remove(&pid) else {
            self.pending_stop.remove(&pid);
            return ReapOutcome::Unknown;
        };
        let was_pending = self.pending_stop.remove(&pid).is_some();
        match self.disposition {
            DeadWorkerDisposition::None => {
                record.restart_count += 1;
                ReapOutcome::Unexpected { record }
            }
            DeadWorkerDisposition::Stop => {
                if status == 0 {
                    ReapOutcome::StoppedClean { record }
                } else {
                    ReapOutcome::StoppedDirty { record, status }
                }
            }
            DeadWorkerDisposition::Reload => {
                if was_pending {
                    ReapOutcome::ReloadReplace { record, status }
                } else {
                    // A replacement worker crashed while the reload was
                    // still draining the old generation.
                    record.restart_count += 1;
                    ReapOutcome::Unexpected { record }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(table: &mut WorkerTable, listener_index: usize) -> WorkerRecord {
        let id = table.allocate_id();
        WorkerRecord::new(id, listener_index)
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut table = WorkerTable::new();
        let a = table.allocate_id();
        let b = table.allocate_id();
        let c = table.allocate_id();
        assert_eq!(a, WorkerId::new(1));
        assert!(a < b && b < c);
    }

    #[test]
    fn test_hashes_are_unique_hex() {
        let mut table = WorkerTable::new();
        let first = record(&mut table, 0);
        let second = record(&mut table, 0);
        assert_ne!(first.hash, second.hash);
        assert_eq!(first.hash.as_str().len(), 32);
        assert!(first.hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unexpected_reap_increments_restart_count() {
        let mut table = WorkerTable::new();
        let rec = record(&mut table, 0);
        let id = rec.id;
        let hash = rec.hash.clone();
        table.insert(100, rec);

        match table.on_reaped(100, 139) {
            ReapOutcome::Unexpected { record } => {
                assert_eq!(record.id, id);
                assert_eq!(record.hash, hash);
                assert_eq!(record.restart_count, 1);
            }
            other => panic!("expected Unexpected, got {other:?}"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_revived_record_crashing_again_counts_up() {
        let mut table = WorkerTable::new();
        let rec = record(&mut table, 0);
        table.insert(100, rec);

        let ReapOutcome::Unexpected { record } = table.on_reaped(100, 1) else {
            panic!("expected Unexpected");
        };
        table.insert(101, record);
        let ReapOutcome::Unexpected { record } = table.on_reaped(101, 1) else {
            panic!("expected Unexpected");
        };
        assert_eq!(record.restart_count, 2);
    }

    #[test]
    fn test_planned_stop_removes_once_and_flags_dirty_exit() {
        let mut table = WorkerTable::new();
        let rec_a = record(&mut table, 0);
        let rec_b = record(&mut table, 0);
        table.insert(100, rec_a);
        table.insert(101, rec_b);
        table.set_disposition(DeadWorkerDisposition::Stop);
        table.snapshot_pending();

        assert!(matches!(
            table.on_reaped(100, 0),
            ReapOutcome::StoppedClean { .. }
        ));
        assert!(matches!(
            table.on_reaped(101, 9),
            ReapOutcome::StoppedDirty { status: 9, .. }
        ));
        assert!(table.is_empty());
        assert!(table.pending_is_empty());
        // removed exactly once: a second reap of the same pid is unknown
        assert!(matches!(table.on_reaped(101, 9), ReapOutcome::Unknown));
    }

    #[test]
    fn test_reload_replaces_pending_and_keeps_restart_count() {
        let mut table = WorkerTable::new();
        let rec = record(&mut table, 0);
        let id = rec.id;
        table.insert(100, rec);
        table.set_disposition(DeadWorkerDisposition::Reload);
        table.snapshot_pending();

        match table.on_reaped(100, 0) {
            ReapOutcome::ReloadReplace { record, status } => {
                assert_eq!(record.id, id);
                assert_eq!(record.restart_count, 0);
                assert_eq!(status, 0);
            }
            other => panic!("expected ReloadReplace, got {other:?}"),
        }
        assert!(table.pending_is_empty());
    }

    #[test]
    fn test_reload_dirty_exit_still_replaces() {
        let mut table = WorkerTable::new();
        let rec = record(&mut table, 0);
        table.insert(100, rec);
        table.set_disposition(DeadWorkerDisposition::Reload);
        table.snapshot_pending();

        assert!(matches!(
            table.on_reaped(100, 137),
            ReapOutcome::ReloadReplace { status: 137, .. }
        ));
    }

    #[test]
    fn test_replacement_crash_during_reload_is_unexpected() {
        let mut table = WorkerTable::new();
        let old = record(&mut table, 0);
        let fresh = record(&mut table, 0);
        table.insert(100, old);
        table.set_disposition(DeadWorkerDisposition::Reload);
        table.snapshot_pending();
        // the replacement forked for a drained worker is not pending
        table.insert(200, fresh);

        assert!(matches!(
            table.on_reaped(200, 1),
            ReapOutcome::Unexpected { .. }
        ));
        assert!(!table.pending_is_empty());
    }

    #[test]
    fn test_unknown_pid() {
        let mut table = WorkerTable::new();
        assert!(matches!(table.on_reaped(999, 0), ReapOutcome::Unknown));
    }

    #[test]
    fn test_hashes_follow_id_order() {
        let mut table = WorkerTable::new();
        let rec_a = record(&mut table, 0);
        let rec_b = record(&mut table, 0);
        let hash_a = rec_a.hash.clone();
        let hash_b = rec_b.hash.clone();
        // insertion order scrambled relative to id order
        table.insert(300, rec_b);
        table.insert(200, rec_a);
        assert_eq!(table.hashes(), vec![hash_a, hash_b]);
    }
}
