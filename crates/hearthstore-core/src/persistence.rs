//! Timed persistence — periodic flush of pending changes to the record store
//!
//! [`TimedPersistence`] is the single entry point the resource tree talks to.
//! Mutations are reported through [`PersistencePolicy::store`] and land in a
//! [`ChangeTracker`]; a background [`PeriodicTask`] runs one flush cycle per
//! period:
//!
//! 1. Skip if a cycle is already running, a transaction is open, or nothing
//!    is pending
//! 2. Compact first if the [`CompactionPolicy`] says so
//! 3. Drain the tracker
//! 4. Remove deleted ids from the directory, serialize and append the rest
//! 5. Stop early if `stop_storage` was called meanwhile
//! 6. Persist the directory, after the data it describes
//!
//! Changes are drained before they are written. When a write fails with an
//! I/O error the rest of that cycle's changes are dropped, not re-queued;
//! [`CycleReport::lost`] counts them. Callers wanting them back must report
//! the resources again.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::compaction::{CompactionPolicy, CompactionReport};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::resource::ResourceTree;
use crate::scheduler::PeriodicTask;
use crate::store::DurableStore;
use crate::tracker::{Change, ChangeKind, ChangeTracker};
use crate::ResourceId;

/// Name of the background flush thread
const FLUSH_THREAD_NAME: &str = "hearthstore-flush";

/// Persistence contract offered to the resource tree.
pub trait PersistencePolicy: Send + Sync {
    /// Report a mutation of `id`. Never blocks on a running flush.
    fn store(&self, id: ResourceId, kind: ChangeKind);

    /// Suppress flush cycles until [`PersistencePolicy::finish_transaction`].
    ///
    /// Advisory only: nothing is rolled back if the process dies inside
    /// the transaction.
    fn start_transaction(&self, scope: ResourceId);

    /// Allow flush cycles again.
    fn finish_transaction(&self, scope: ResourceId);

    /// Start periodic flushing.
    fn start_storage(&self) -> StoreResult<()>;

    /// Stop periodic flushing. A cycle in progress stops before its next write.
    fn stop_storage(&self);
}

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle was still running
    Busy,
    /// A transaction was open
    InTransaction,
    /// No change was pending
    NothingPending,
    /// Storage has been stopped
    Stopped,
}

/// Why a cycle ended before processing every drained change.
#[derive(Debug, Clone)]
pub enum AbortReason {
    /// `stop_storage` was called during the cycle
    Stopped,
    /// A write, compaction or directory persist failed
    Io(StoreError),
}

/// What one flush cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Records appended
    pub written: usize,
    /// Directory entries removed
    pub removed: usize,
    /// Changes skipped (serialization failure, oversized, vanished resource)
    pub skipped: usize,
    /// Drained changes never processed because the cycle aborted
    pub lost: usize,
    /// Compaction run at the start of the cycle
    pub compaction: Option<CompactionReport>,
    /// Set if the cycle ended early
    pub aborted: Option<AbortReason>,
}

/// Result of one tick.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The tick was a no-op
    Skipped(SkipReason),
    /// The cycle body ran
    Completed(CycleReport),
}

impl CycleOutcome {
    /// Report of the cycle, if it ran.
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped(_) => None,
        }
    }

    /// Skip reason, if the tick was a no-op.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            CycleOutcome::Skipped(reason) => Some(*reason),
            CycleOutcome::Completed(_) => None,
        }
    }
}

/// Cumulative counters since the handle was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    /// Cycles that passed every skip check, aborted ones included
    pub cycles: u64,
    /// Ticks skipped because another cycle held the guard
    pub skipped_busy: u64,
    /// Ticks skipped because a transaction was open
    pub skipped_transaction: u64,
    /// Ticks skipped with nothing pending
    pub skipped_empty: u64,
    /// Ticks skipped after `stop_storage`
    pub skipped_stopped: u64,
    /// Records appended to the store
    pub records_written: u64,
    /// Directory entries removed for deleted resources
    pub records_removed: u64,
    /// Changes skipped because their payload could not be produced or stored
    pub serialization_failures: u64,
    /// Cycles aborted by a store I/O error
    pub io_failures: u64,
    /// Compactions run, scheduled or through `compact_now`
    pub compactions: u64,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    skipped_busy: AtomicU64,
    skipped_transaction: AtomicU64,
    skipped_empty: AtomicU64,
    skipped_stopped: AtomicU64,
    records_written: AtomicU64,
    records_removed: AtomicU64,
    serialization_failures: AtomicU64,
    io_failures: AtomicU64,
    compactions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn skipped(&self, reason: SkipReason) -> CycleOutcome {
        let counter = match reason {
            SkipReason::Busy => &self.skipped_busy,
            SkipReason::InTransaction => &self.skipped_transaction,
            SkipReason::NothingPending => &self.skipped_empty,
            SkipReason::Stopped => &self.skipped_stopped,
        };
        Self::bump(counter, 1);
        CycleOutcome::Skipped(reason)
    }

    fn snapshot(&self) -> PersistenceStats {
        PersistenceStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_busy: self.skipped_busy.load(Ordering::Relaxed),
            skipped_transaction: self.skipped_transaction.load(Ordering::Relaxed),
            skipped_empty: self.skipped_empty.load(Ordering::Relaxed),
            skipped_stopped: self.skipped_stopped.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_removed: self.records_removed.load(Ordering::Relaxed),
            serialization_failures: self.serialization_failures.load(Ordering::Relaxed),
            io_failures: self.io_failures.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }
}

/// Holds the running flag for the lifetime of one cycle body.
struct CycleGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Effect of one change on the store.
enum Applied {
    Written,
    Removed,
    /// Deleted id that had no entry
    Unchanged,
    /// The tree no longer knows the id
    Vanished,
}

/// State shared between the handle and the flush thread.
struct Shared {
    tracker: ChangeTracker,
    store: Mutex<DurableStore>,
    tree: Arc<dyn ResourceTree>,
    compaction: CompactionPolicy,
    running: AtomicBool,
    in_transaction: AtomicBool,
    stop: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn apply(&self, store: &mut DurableStore, change: &Change) -> StoreResult<Applied> {
        if change.kind == ChangeKind::Deleted {
            return Ok(match store.remove(change.id) {
                Some(_) => Applied::Removed,
                None => Applied::Unchanged,
            });
        }

        let payload = self.tree.serialize(change.id).map_err(|e| StoreError::Serialization {
            id: change.id,
            reason: e.reason,
        })?;
        match payload {
            Some(payload) => {
                store.append(change.id, &payload)?;
                Ok(Applied::Written)
            }
            None => Ok(Applied::Vanished),
        }
    }

    fn run_cycle(&self) -> CycleOutcome {
        if self.stop.load(Ordering::Acquire) {
            return self.counters.skipped(SkipReason::Stopped);
        }
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            return self.counters.skipped(SkipReason::Busy);
        };
        if self.in_transaction.load(Ordering::Acquire) {
            return self.counters.skipped(SkipReason::InTransaction);
        }
        if self.tracker.is_empty() {
            return self.counters.skipped(SkipReason::NothingPending);
        }

        let mut store = self.store.lock();
        let mut report = CycleReport::default();

        if self.compaction.compaction_required(&store) {
            match self.compaction.compact(&mut store) {
                Ok(compaction) => {
                    Counters::bump(&self.counters.compactions, 1);
                    report.compaction = Some(compaction);
                }
                Err(e) => {
                    // Nothing drained yet, so pending changes wait for the next cycle
                    error!(error = %e, "Compaction failed, skipping flush");
                    Counters::bump(&self.counters.io_failures, 1);
                    Counters::bump(&self.counters.cycles, 1);
                    report.aborted = Some(AbortReason::Io(e));
                    return CycleOutcome::Completed(report);
                }
            }
        }

        let changes = self.tracker.drain();
        let total = changes.len();
        let mut changed = false;

        for (index, change) in changes.iter().enumerate() {
            if self.stop.load(Ordering::Acquire) {
                report.lost = total - index;
                report.aborted = Some(AbortReason::Stopped);
                warn!(lost = report.lost, "Storage stopped during flush");
                break;
            }

            match self.apply(&mut store, change) {
                Ok(Applied::Written) => {
                    report.written += 1;
                    changed = true;
                }
                Ok(Applied::Removed) => {
                    report.removed += 1;
                    changed = true;
                }
                Ok(Applied::Unchanged) => {}
                Ok(Applied::Vanished) => {
                    debug!(id = change.id, "Resource vanished before flush, skipping");
                    report.skipped += 1;
                }
                Err(e) if e.is_record_local() => {
                    warn!(id = change.id, error = %e, "Record rejected, skipping resource");
                    Counters::bump(&self.counters.serialization_failures, 1);
                    report.skipped += 1;
                }
                Err(e) => {
                    report.lost = total - index;
                    error!(id = change.id, lost = report.lost, error = %e, "Write failed, aborting flush");
                    Counters::bump(&self.counters.io_failures, 1);
                    report.aborted = Some(AbortReason::Io(e));
                    break;
                }
            }
        }

        if changed {
            if let Err(e) = store.persist_directory() {
                error!(error = %e, "Failed to persist directory");
                Counters::bump(&self.counters.io_failures, 1);
                if report.aborted.is_none() {
                    report.aborted = Some(AbortReason::Io(e));
                }
            }
        }

        Counters::bump(&self.counters.cycles, 1);
        Counters::bump(&self.counters.records_written, report.written as u64);
        Counters::bump(&self.counters.records_removed, report.removed as u64);

        if report.written + report.removed > 0 {
            info!(
                written = report.written,
                removed = report.removed,
                skipped = report.skipped,
                "Flushed changes to record store"
            );
        }
        CycleOutcome::Completed(report)
    }
}

/// Periodic flush of tracked changes into a [`DurableStore`].
///
/// All public methods take `&self`; share the handle with `Arc`.
pub struct TimedPersistence {
    shared: Arc<Shared>,
    period: Mutex<Duration>,
    task: Mutex<Option<PeriodicTask>>,
}

impl TimedPersistence {
    /// Wrap an opened store.
    pub fn new(store: DurableStore, tree: Arc<dyn ResourceTree>, config: &Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                tracker: ChangeTracker::new(),
                store: Mutex::new(store),
                tree,
                compaction: CompactionPolicy::from_config(config),
                running: AtomicBool::new(false),
                in_transaction: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            period: Mutex::new(config.flush_period),
            task: Mutex::new(None),
        }
    }

    /// Open the store in `path` and wrap it.
    pub fn open<P: AsRef<Path>>(path: P, tree: Arc<dyn ResourceTree>, config: &Config) -> StoreResult<Self> {
        let store = DurableStore::open_dir(path, config)?;
        Ok(Self::new(store, tree, config))
    }

    /// Run one flush cycle now, on the calling thread.
    ///
    /// Follows the same rules as a scheduled tick, including the skip
    /// conditions and the exclusivity with a scheduled cycle.
    pub fn tick(&self) -> CycleOutcome {
        self.shared.run_cycle()
    }

    /// Compact immediately unless a cycle is running.
    ///
    /// Returns `Ok(None)` when skipped because a cycle holds the store.
    pub fn compact_now(&self) -> StoreResult<Option<CompactionReport>> {
        let Some(_guard) = CycleGuard::acquire(&self.shared.running) else {
            return Ok(None);
        };
        let mut store = self.shared.store.lock();
        let report = self.shared.compaction.compact(&mut store)?;
        Counters::bump(&self.shared.counters.compactions, 1);
        Ok(Some(report))
    }

    /// Mark every resource the tree knows as modified.
    ///
    /// Used to seed an empty store from an already populated tree.
    /// Returns the number of ids recorded.
    pub fn persist_all(&self) -> usize {
        let ids = self.shared.tree.live_ids();
        for id in &ids {
            self.shared.tracker.record(*id, ChangeKind::Modified);
        }
        info!(resources = ids.len(), "Scheduled full persist");
        ids.len()
    }

    /// Latest persisted payload of `id`.
    pub fn read_latest(&self, id: ResourceId) -> StoreResult<Option<Vec<u8>>> {
        self.shared.store.lock().read_latest(id)
    }

    /// Run `f` with shared access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&DurableStore) -> R) -> R {
        f(&self.shared.store.lock())
    }

    /// Pending change tracker.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.shared.tracker
    }

    /// True while a transaction suppresses flushing.
    pub fn in_transaction(&self) -> bool {
        self.shared.in_transaction.load(Ordering::Acquire)
    }

    /// True while the periodic task is active.
    pub fn is_storage_running(&self) -> bool {
        self.task.lock().as_ref().map_or(false, |t| t.is_running())
    }

    /// Flush period used by the next `start_storage`.
    pub fn period(&self) -> Duration {
        *self.period.lock()
    }

    /// Change the flush period.
    ///
    /// A running task keeps its period; the new one applies from the next
    /// `start_storage`.
    pub fn set_period(&self, period: Duration) -> StoreResult<()> {
        if period.is_zero() {
            return Err(StoreError::InvalidConfig("flush_period must be > 0".into()));
        }
        *self.period.lock() = period;
        debug!(period_ms = period.as_millis() as u64, "Flush period changed");
        Ok(())
    }

    /// Cumulative counters.
    pub fn stats(&self) -> PersistenceStats {
        self.shared.counters.snapshot()
    }
}

impl PersistencePolicy for TimedPersistence {
    fn store(&self, id: ResourceId, kind: ChangeKind) {
        self.shared.tracker.record(id, kind);
    }

    fn start_transaction(&self, scope: ResourceId) {
        self.shared.in_transaction.store(true, Ordering::Release);
        debug!(scope, "Transaction started, flushing suspended");
    }

    fn finish_transaction(&self, scope: ResourceId) {
        self.shared.in_transaction.store(false, Ordering::Release);
        debug!(scope, "Transaction finished, flushing resumed");
    }

    fn start_storage(&self) -> StoreResult<()> {
        let mut task = self.task.lock();
        if task.as_ref().map_or(false, |t| t.is_running()) {
            return Err(StoreError::AlreadyStarted);
        }

        self.shared.stop.store(false, Ordering::Release);
        let period = self.period();
        let shared = Arc::clone(&self.shared);
        *task = Some(PeriodicTask::spawn(FLUSH_THREAD_NAME, period, move || {
            shared.run_cycle();
        })?);

        info!(period_ms = period.as_millis() as u64, "Timed persistence started");
        Ok(())
    }

    fn stop_storage(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel();
            info!("Timed persistence stopped");
        }
    }
}

impl Drop for TimedPersistence {
    fn drop(&mut self) {
        self.stop_storage();
    }
}
