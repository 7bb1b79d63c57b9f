//! Change tracking — pending mutations awaiting the next flush cycle
//!
//! Mutator threads report every create/modify/delete here. The tracker keeps
//! at most one pending change per resource, folding repeated notifications
//! together, and hands the whole set to the flush cycle in one atomic drain.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::ResourceId;

/// Kind of mutation reported for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Resource was created
    Created,
    /// Resource value or structure changed
    Modified,
    /// Resource was deleted
    Deleted,
}

/// A pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// Resource the change applies to
    pub id: ResourceId,
    /// Folded kind of all notifications since the last drain
    pub kind: ChangeKind,
    /// Tracker-wide sequence number of the first accepted notification
    pub sequence: u64,
}

/// What [`ChangeTracker::record`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No change was pending for the id; a new entry was added
    Inserted,
    /// Folded into the pending entry, whose kind is unchanged
    Coalesced,
    /// Deletion of a resource created in this cycle; both dropped
    Cancelled,
    /// Pending modification replaced by a deletion
    Superseded,
    /// Pending deletion wins; the notification was discarded
    Ignored,
}

/// Thread-safe set of pending changes keyed by resource id.
pub struct ChangeTracker {
    pending: Mutex<HashMap<ResourceId, Change>>,
    next_sequence: AtomicU64,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Record a mutation of `id`, merging with any pending change.
    ///
    /// Merge rule for an id that already has a pending change:
    ///
    /// | pending            | new       | result                 |
    /// |--------------------|-----------|------------------------|
    /// | Created            | Deleted   | entry removed          |
    /// | Modified           | Deleted   | Deleted                |
    /// | Deleted            | anything  | unchanged              |
    /// | Created / Modified | Created / Modified | unchanged     |
    ///
    /// Only holds the pending-set lock for a map lookup; never waits on a
    /// flush in progress.
    pub fn record(&self, id: ResourceId, kind: ChangeKind) -> MergeOutcome {
        let mut pending = self.pending.lock();
        let existing = pending.get(&id).map(|c| c.kind);
        match (existing, kind) {
            (None, _) => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
                pending.insert(id, Change { id, kind, sequence });
                MergeOutcome::Inserted
            }
            (Some(ChangeKind::Deleted), _) => MergeOutcome::Ignored,
            (Some(ChangeKind::Created), ChangeKind::Deleted) => {
                pending.remove(&id);
                MergeOutcome::Cancelled
            }
            (Some(ChangeKind::Modified), ChangeKind::Deleted) => {
                if let Some(change) = pending.get_mut(&id) {
                    change.kind = ChangeKind::Deleted;
                }
                MergeOutcome::Superseded
            }
            (Some(_), ChangeKind::Created | ChangeKind::Modified) => MergeOutcome::Coalesced,
        }
    }

    /// Take every pending change, leaving the set empty.
    ///
    /// Changes come back in the order they were first recorded. Anything
    /// recorded after the drain lands in the next cycle's set.
    pub fn drain(&self) -> Vec<Change> {
        let taken = std::mem::take(&mut *self.pending.lock());
        let mut changes: Vec<Change> = taken.into_values().collect();
        changes.sort_unstable_by_key(|c| c.sequence);
        changes
    }

    /// Pending change for `id`, if any.
    pub fn pending(&self, id: ResourceId) -> Option<Change> {
        self.pending.lock().get(&id).copied()
    }

    /// Number of ids with a pending change.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for ChangeTracker {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tracker_basics() {
        let tracker = ChangeTracker::new();
        assert!(tracker.is_empty());

        assert_eq!(tracker.record(1, ChangeKind::Created), MergeOutcome::Inserted);
        assert_eq!(tracker.record(2, ChangeKind::Modified), MergeOutcome::Inserted);
        assert_eq!(tracker.pending_count(), 2);

        // Same id twice doesn't increase count
        assert_eq!(tracker.record(1, ChangeKind::Modified), MergeOutcome::Coalesced);
        assert_eq!(tracker.pending_count(), 2);

        let drained = tracker.drain();
        assert_eq!(drained.len(), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_created_then_modified_stays_created() {
        let tracker = ChangeTracker::new();
        tracker.record(1, ChangeKind::Created);
        tracker.record(1, ChangeKind::Modified);
        tracker.record(1, ChangeKind::Modified);
        assert_eq!(tracker.pending(1).unwrap().kind, ChangeKind::Created);
    }

    #[test]
    fn test_created_then_deleted_cancels() {
        let tracker = ChangeTracker::new();
        tracker.record(2, ChangeKind::Created);
        assert_eq!(tracker.record(2, ChangeKind::Deleted), MergeOutcome::Cancelled);
        assert!(tracker.pending(2).is_none());
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn test_modified_then_deleted_supersedes() {
        let tracker = ChangeTracker::new();
        tracker.record(3, ChangeKind::Modified);
        assert_eq!(tracker.record(3, ChangeKind::Deleted), MergeOutcome::Superseded);
        assert_eq!(tracker.pending(3).unwrap().kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_deleted_cannot_be_resurrected() {
        let tracker = ChangeTracker::new();
        tracker.record(4, ChangeKind::Deleted);
        assert_eq!(tracker.record(4, ChangeKind::Modified), MergeOutcome::Ignored);
        assert_eq!(tracker.record(4, ChangeKind::Created), MergeOutcome::Ignored);
        assert_eq!(tracker.pending(4).unwrap().kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_drain_orders_by_first_record() {
        let tracker = ChangeTracker::new();
        for id in [50u64, 7, 23, 1] {
            tracker.record(id, ChangeKind::Modified);
        }
        tracker.record(50, ChangeKind::Modified);

        let ids: Vec<ResourceId> = tracker.drain().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![50, 7, 23, 1]);
    }

    #[test]
    fn test_records_after_drain_go_to_next_cycle() {
        let tracker = ChangeTracker::new();
        tracker.record(1, ChangeKind::Deleted);
        assert_eq!(tracker.drain().len(), 1);

        // A fresh cycle accepts a new creation for the same id
        assert_eq!(tracker.record(1, ChangeKind::Created), MergeOutcome::Inserted);
        assert_eq!(tracker.drain()[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_concurrent_record_and_drain_loses_nothing() {
        let tracker = Arc::new(ChangeTracker::new());
        let mut handles = vec![];
        for t in 0..8u64 {
            let tracker = Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                for i in 0..500u64 {
                    tracker.record(t * 1_000 + i, ChangeKind::Modified);
                }
            }));
        }

        let mut seen = std::collections::HashSet::new();
        while handles.iter().any(|h| !h.is_finished()) {
            for change in tracker.drain() {
                assert!(seen.insert(change.id), "id drained twice");
            }
        }
        for h in handles { h.join().unwrap(); }
        for change in tracker.drain() {
            assert!(seen.insert(change.id), "id drained twice");
        }
        assert_eq!(seen.len(), 8 * 500);
    }
}
