//! Durable record store: segments on a [`Volume`] plus the in-memory directory.
//!
//! Records are only ever appended at the end of the active segment, so a
//! directory entry can never point into space that has been reused. Old
//! records become stale when their id is rewritten or deleted and stay on
//! disk until compaction rewrites the live set.
//!
//! **Write ordering**: segment data is synced before the directory block
//! that references it is written. A crash in between leaves unreferenced
//! bytes, never a dangling entry.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::directory::Directory;
use crate::error::{StoreError, StoreResult};
use crate::format::{self, DirEntry, RECORD_HEADER_SIZE};
use crate::volume::{FileVolume, Volume};
use crate::ResourceId;

/// Per-segment figures reported by [`DurableStore::segments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment sequence number
    pub segment: u64,
    /// Segment length in bytes
    pub bytes: u64,
    /// Live records stored in this segment
    pub live_records: usize,
    /// True for the segment new records are appended to
    pub active: bool,
}

/// Result of [`DurableStore::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Live records read back and checked
    pub records_checked: usize,
    /// Bytes covered by those records
    pub bytes_checked: u64,
}

/// Append-only record store with an id -> location directory.
pub struct DurableStore {
    pub(crate) volume: Box<dyn Volume>,
    pub(crate) directory: Directory,
    /// Segment receiving appends
    pub(crate) active_segment: u64,
    /// Length of every segment still present
    pub(crate) segment_bytes: BTreeMap<u64, u64>,
    /// Number for the next segment created; only ever grows
    pub(crate) next_segment: u64,
    pub(crate) max_file_size: u64,
    max_record_size: usize,
}

impl DurableStore {
    /// Open (or create) a store in the directory at `path`.
    pub fn open_dir<P: AsRef<Path>>(path: P, config: &Config) -> StoreResult<Self> {
        let volume = FileVolume::open(path)?;
        Self::open(Box::new(volume), config)
    }

    /// Open a store over `volume`, recovering the directory block.
    ///
    /// Recovery:
    /// 1. Load and checksum the directory block (missing block = empty store)
    /// 2. Check every entry lies inside an existing segment
    /// 3. Delete segments nothing references except the active one
    ///
    /// A directory that disagrees with the segments is reported as
    /// [`StoreError::Consistency`] and nothing is modified.
    pub fn open(mut volume: Box<dyn Volume>, config: &Config) -> StoreResult<Self> {
        config.validate().map_err(StoreError::InvalidConfig)?;

        let mut segment_bytes = BTreeMap::new();
        for segment in volume.segments()? {
            segment_bytes.insert(segment, volume.segment_len(segment)?);
        }

        let (recorded_active, entries) = match volume.read_directory()? {
            Some(block) => {
                let (active, entries) = format::decode_directory(&block)?;
                (Some(active), entries)
            }
            None => {
                debug!(volume = %volume.describe(), "No directory block, starting empty");
                (None, Vec::new())
            }
        };

        let mut directory = Directory::new();
        for (id, entry) in entries {
            check_entry(id, &entry, &segment_bytes)?;
            if directory.insert(id, entry).is_some() {
                return Err(StoreError::consistency(format!("resource {} listed twice in directory", id)));
            }
        }

        let active_segment = recorded_active
            .or_else(|| segment_bytes.keys().next_back().copied())
            .unwrap_or(1);
        if !segment_bytes.contains_key(&active_segment) {
            if recorded_active.is_some() {
                warn!(segment = active_segment, "Active segment missing, recreating it empty");
            }
            volume.create_segment(active_segment)?;
            segment_bytes.insert(active_segment, 0);
        }

        // Seeded before orphan cleanup so leftover numbers are not reused
        let next_segment = segment_bytes.keys().next_back().copied().unwrap_or(0).max(active_segment) + 1;

        let referenced = directory.referenced_segments();
        let orphans: Vec<u64> = segment_bytes
            .keys()
            .copied()
            .filter(|s| *s != active_segment && !referenced.contains(s))
            .collect();
        for segment in orphans {
            info!(segment, bytes = segment_bytes[&segment], "Removing unreferenced segment");
            volume.remove_segment(segment)?;
            segment_bytes.remove(&segment);
        }

        let store = Self {
            volume,
            directory,
            active_segment,
            segment_bytes,
            next_segment,
            max_file_size: config.max_file_size,
            max_record_size: config.max_record_size,
        };

        info!(
            volume = %store.volume.describe(),
            resources = store.len(),
            segments = store.segment_bytes.len(),
            stale_bytes = store.stale_bytes(),
            "Opened record store"
        );
        Ok(store)
    }

    /// Append the latest payload of `id` and point the directory at it.
    ///
    /// Rolls over to a new segment first when the record would push the
    /// active segment past `max_file_size`. A record bigger than the limit
    /// still gets written, alone in a fresh segment.
    pub fn append(&mut self, id: ResourceId, payload: &[u8]) -> StoreResult<DirEntry> {
        if payload.len() > self.max_record_size {
            return Err(StoreError::OversizedRecord {
                id,
                size: payload.len() as u64,
                max_size: self.max_record_size as u64,
            });
        }

        let record = format::encode_record(id, payload);
        let record_len = record.len() as u64;

        let active_len = self.active_len();
        if active_len > 0 && active_len + record_len > self.max_file_size {
            self.roll_over()?;
        }

        let offset = match self.volume.append(self.active_segment, &record) {
            Ok(offset) => offset,
            Err(e) => {
                self.refresh_active_len();
                return Err(e);
            }
        };
        self.segment_bytes.insert(self.active_segment, offset + record_len);

        let entry = DirEntry { segment: self.active_segment, offset, length: record_len as u32 };
        if let Some(previous) = self.directory.insert(id, entry) {
            trace!(id, stale = previous.length, "Superseded record");
        }
        Ok(entry)
    }

    /// Drop the directory entry of `id`. Its record becomes stale.
    pub fn remove(&mut self, id: ResourceId) -> Option<DirEntry> {
        self.directory.remove(id)
    }

    /// Latest payload written for `id`, or `None` if it has no entry.
    pub fn read_latest(&self, id: ResourceId) -> StoreResult<Option<Vec<u8>>> {
        match self.directory.get(id) {
            Some(entry) => {
                let record = self.read_record(id, &entry)?;
                Ok(Some(record[RECORD_HEADER_SIZE..].to_vec()))
            }
            None => Ok(None),
        }
    }

    /// Read and verify the whole record (header included) behind `entry`.
    pub(crate) fn read_record(&self, id: ResourceId, entry: &DirEntry) -> StoreResult<Vec<u8>> {
        let data = self.volume.read_at(entry.segment, entry.offset, entry.length as usize)?;
        let (stored_id, _) = format::decode_record(&data, entry.segment, entry.offset)?;
        if stored_id != id {
            return Err(StoreError::consistency(format!(
                "directory entry for resource {} points at record of resource {} (segment {}, offset {})",
                id, stored_id, entry.segment, entry.offset
            )));
        }
        Ok(data)
    }

    /// Sync the active segment, then durably write the directory block.
    pub fn persist_directory(&mut self) -> StoreResult<()> {
        self.volume.sync_segment(self.active_segment)?;
        let block = self.directory.encode(self.active_segment);
        self.volume.write_directory(&block)?;
        debug!(resources = self.directory.len(), bytes = block.len(), "Persisted directory");
        Ok(())
    }

    /// Read back every live record and check header, checksum and id.
    pub fn verify(&self) -> StoreResult<VerifyReport> {
        let mut report = VerifyReport::default();
        for id in self.directory.sorted_ids() {
            if let Some(entry) = self.directory.get(id) {
                self.read_record(id, &entry)?;
                report.records_checked += 1;
                report.bytes_checked += entry.length as u64;
            }
        }
        Ok(report)
    }

    fn roll_over(&mut self) -> StoreResult<()> {
        self.volume.sync_segment(self.active_segment)?;

        let next = self.allocate_segment();
        self.volume.create_segment(next)?;
        self.segment_bytes.insert(next, 0);

        info!(from = self.active_segment, to = next, "Rolled over to new segment");
        self.active_segment = next;
        Ok(())
    }

    /// Reserve a segment number that no earlier segment of this store used.
    pub(crate) fn allocate_segment(&mut self) -> u64 {
        let segment = self.next_segment;
        self.next_segment += 1;
        segment
    }

    /// Re-read the active segment length after a failed append.
    fn refresh_active_len(&mut self) {
        match self.volume.segment_len(self.active_segment) {
            Ok(len) => {
                self.segment_bytes.insert(self.active_segment, len);
            }
            Err(e) => warn!(segment = self.active_segment, error = %e, "Could not re-read segment length"),
        }
    }

    fn active_len(&self) -> u64 {
        self.segment_bytes.get(&self.active_segment).copied().unwrap_or(0)
    }

    /// Directory entry for `id`.
    pub fn entry(&self, id: ResourceId) -> Option<DirEntry> {
        self.directory.get(id)
    }

    /// True if `id` has a live record.
    pub fn contains(&self, id: ResourceId) -> bool {
        self.directory.contains(id)
    }

    /// Number of resources with a live record.
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    /// True if the store holds no live record.
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<ResourceId> {
        self.directory.sorted_ids()
    }

    /// Segment currently receiving appends.
    pub fn active_segment(&self) -> u64 {
        self.active_segment
    }

    /// Bytes across all segments, live and stale.
    pub fn total_bytes(&self) -> u64 {
        self.segment_bytes.values().sum()
    }

    /// Bytes of records the directory references.
    pub fn live_bytes(&self) -> u64 {
        self.directory.live_bytes()
    }

    /// Bytes of superseded or deleted records still on disk.
    pub fn stale_bytes(&self) -> u64 {
        self.total_bytes().saturating_sub(self.live_bytes())
    }

    /// Stale bytes as a fraction of total bytes (0.0 for an empty store).
    pub fn stale_ratio(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        self.stale_bytes() as f64 / total as f64
    }

    /// Figures for every segment, ascending.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.segment_bytes
            .iter()
            .map(|(segment, bytes)| SegmentInfo {
                segment: *segment,
                bytes: *bytes,
                live_records: self.directory.records_in(*segment),
                active: *segment == self.active_segment,
            })
            .collect()
    }
}

/// Reject entries pointing outside their segment.
fn check_entry(id: ResourceId, entry: &DirEntry, segment_bytes: &BTreeMap<u64, u64>) -> StoreResult<()> {
    let Some(len) = segment_bytes.get(&entry.segment) else {
        return Err(StoreError::consistency(format!(
            "resource {} points into missing segment {}",
            id, entry.segment
        )));
    };
    if (entry.length as usize) < RECORD_HEADER_SIZE {
        return Err(StoreError::consistency(format!(
            "resource {} has impossible record length {}",
            id, entry.length
        )));
    }
    if entry.end() > *len {
        return Err(StoreError::consistency(format!(
            "resource {} points past end of segment {} ({} > {})",
            id, entry.segment, entry.end(), len
        )));
    }
    Ok(())
}
