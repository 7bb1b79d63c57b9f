//! Compaction — stale space reclamation for record segments
//!
//! Over time segments accumulate superseded records and records of deleted
//! resources. Compaction copies only the records the directory references
//! into fresh segments, switches the directory over, and drops the old
//! segments.
//!
//! Crash safety comes from the directory block being the only pointer:
//! 1. Write live records (ascending id) to new segments
//! 2. durable_sync the new segments
//! 3. Atomically replace the directory block (the switch point)
//! 4. Remove the old segments
//!
//! If the process crashes before step 3, the old directory is intact and the
//! new segments are unreferenced; the next open removes them. After step 3
//! the old segments are the unreferenced ones.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::directory::Directory;
use crate::error::StoreResult;
use crate::format::DirEntry;
use crate::store::DurableStore;

/// Result of a compaction run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionReport {
    /// Live records copied
    pub live_records: usize,
    /// Total store bytes before compaction
    pub original_bytes: u64,
    /// Total store bytes after compaction
    pub compacted_bytes: u64,
    /// Segments removed
    pub segments_removed: usize,
    /// Segment receiving appends afterwards
    pub active_segment: u64,
}

impl CompactionReport {
    /// Space reclaimed in bytes.
    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compacted_bytes)
    }
}

/// Decides when compaction is due and performs it.
#[derive(Debug, Clone, Copy)]
pub struct CompactionPolicy {
    trigger_ratio: f64,
}

impl CompactionPolicy {
    /// Policy compacting once stale bytes exceed `trigger_ratio` of all bytes.
    pub fn new(trigger_ratio: f64) -> Self {
        Self { trigger_ratio }
    }

    /// Policy using [`Config::compaction_trigger_ratio`].
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.compaction_trigger_ratio)
    }

    /// Configured stale-byte ratio threshold.
    pub fn trigger_ratio(&self) -> f64 {
        self.trigger_ratio
    }

    /// True when the stale/total byte ratio strictly exceeds the threshold.
    pub fn compaction_required(&self, store: &DurableStore) -> bool {
        store.total_bytes() > 0 && store.stale_ratio() > self.trigger_ratio
    }

    /// Rewrite the store so it holds only the latest record of every live id.
    ///
    /// Must not run while a flush cycle is writing to `store`; the exclusive
    /// borrow enforces that within one process.
    pub fn compact(&self, store: &mut DurableStore) -> StoreResult<CompactionReport> {
        let original_bytes = store.total_bytes();
        let old_segments: Vec<u64> = store.segment_bytes.keys().copied().collect();
        let first_new = store.next_segment;

        let (directory, new_segments) = match copy_live_records(store) {
            Ok(copied) => copied,
            Err(e) => {
                // Old directory still rules; drop whatever was half written
                for segment in first_new..store.next_segment {
                    if let Err(cleanup) = store.volume.remove_segment(segment) {
                        warn!(segment, error = %cleanup, "Could not remove partial compaction segment");
                    }
                }
                return Err(e);
            }
        };

        // A failed write may still have replaced the block on disk, so the
        // new segments stay reserved either way
        let active_segment = new_segments.keys().next_back().copied().unwrap_or(first_new);
        store.volume.write_directory(&directory.encode(active_segment))?;

        let live_records = directory.len();
        store.directory = directory;
        store.active_segment = active_segment;
        store.segment_bytes = new_segments;

        let mut segments_removed = 0;
        for segment in &old_segments {
            match store.volume.remove_segment(*segment) {
                Ok(()) => segments_removed += 1,
                // Unreferenced now; the next open removes it
                Err(e) => warn!(segment, error = %e, "Could not remove compacted segment"),
            }
        }

        let report = CompactionReport {
            live_records,
            original_bytes,
            compacted_bytes: store.total_bytes(),
            segments_removed,
            active_segment,
        };
        info!(
            live_records = report.live_records,
            original_bytes = report.original_bytes,
            compacted_bytes = report.compacted_bytes,
            bytes_saved = report.bytes_saved(),
            "Compacted record store"
        );
        Ok(report)
    }
}

/// Copy every live record, ascending id, into freshly allocated segments.
///
/// Returns the rebuilt directory and the length of each new segment.
fn copy_live_records(store: &mut DurableStore) -> StoreResult<(Directory, BTreeMap<u64, u64>)> {
    let mut directory = Directory::new();
    let mut lengths = BTreeMap::new();
    let mut segment = store.allocate_segment();
    let mut segment_len = 0u64;

    store.volume.create_segment(segment)?;
    lengths.insert(segment, 0);

    for id in store.directory.sorted_ids() {
        let Some(entry) = store.directory.get(id) else { continue };
        // Verified copy: a corrupt record aborts compaction instead of spreading
        let record = store.read_record(id, &entry)?;
        let record_len = record.len() as u64;

        if segment_len > 0 && segment_len + record_len > store.max_file_size {
            store.volume.sync_segment(segment)?;
            segment = store.allocate_segment();
            store.volume.create_segment(segment)?;
            lengths.insert(segment, 0);
            segment_len = 0;
        }

        let offset = store.volume.append(segment, &record)?;
        segment_len = offset + record_len;
        lengths.insert(segment, segment_len);
        directory.insert(id, DirEntry { segment, offset, length: entry.length });
    }

    store.volume.sync_segment(segment)?;
    debug!(records = directory.len(), segments = lengths.len(), "Copied live records");
    Ok((directory, lengths))
}
