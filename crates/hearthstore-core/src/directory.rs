//! In-memory directory: resource id -> location of its latest record.

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::format::{self, DirEntry};
use crate::ResourceId;

/// Index of the latest live record per resource.
///
/// Tracks the total length of all referenced records so the store can
/// derive its stale byte count without scanning segments.
#[derive(Debug, Default, Clone)]
pub struct Directory {
    entries: HashMap<ResourceId, DirEntry>,
    live_bytes: u64,
}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `id` at `entry`. Returns the entry it replaces, whose record
    /// is stale from now on.
    pub fn insert(&mut self, id: ResourceId, entry: DirEntry) -> Option<DirEntry> {
        self.live_bytes += entry.length as u64;
        let previous = self.entries.insert(id, entry);
        if let Some(prev) = &previous {
            self.live_bytes -= prev.length as u64;
        }
        previous
    }

    /// Drop the entry for `id`.
    pub fn remove(&mut self, id: ResourceId) -> Option<DirEntry> {
        let removed = self.entries.remove(&id);
        if let Some(entry) = &removed {
            self.live_bytes -= entry.length as u64;
        }
        removed
    }

    /// Location of the latest record of `id`.
    pub fn get(&self, id: ResourceId) -> Option<DirEntry> {
        self.entries.get(&id).copied()
    }

    /// True if `id` has a live record.
    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no resource has a live record.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the lengths of all referenced records.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Live ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Segments holding at least one live record.
    pub fn referenced_segments(&self) -> BTreeSet<u64> {
        self.entries.values().map(|e| e.segment).collect()
    }

    /// Number of live records stored in `segment`.
    pub fn records_in(&self, segment: u64) -> usize {
        self.entries.values().filter(|e| e.segment == segment).count()
    }

    /// Serialize into a directory block, entries in ascending id order.
    pub fn encode(&self, active_segment: u64) -> Vec<u8> {
        let mut sorted: Vec<(ResourceId, &DirEntry)> =
            self.entries.iter().map(|(id, entry)| (*id, entry)).collect();
        sorted.sort_unstable_by_key(|(id, _)| *id);
        format::encode_directory(active_segment, sorted.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(segment: u64, offset: u64, length: u32) -> DirEntry {
        DirEntry { segment, offset, length }
    }

    #[test]
    fn test_live_bytes_accounting() {
        let mut dir = Directory::new();
        assert_eq!(dir.insert(1, entry(1, 0, 40)), None);
        assert_eq!(dir.insert(2, entry(1, 40, 30)), None);
        assert_eq!(dir.live_bytes(), 70);

        // Overwrite replaces the old length
        assert_eq!(dir.insert(1, entry(1, 70, 50)), Some(entry(1, 0, 40)));
        assert_eq!(dir.live_bytes(), 80);

        assert_eq!(dir.remove(2), Some(entry(1, 40, 30)));
        assert_eq!(dir.live_bytes(), 50);
        assert_eq!(dir.remove(2), None);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_sorted_ids_and_segments() {
        let mut dir = Directory::new();
        dir.insert(30, entry(2, 0, 24));
        dir.insert(10, entry(1, 0, 24));
        dir.insert(20, entry(2, 24, 24));

        assert_eq!(dir.sorted_ids(), vec![10, 20, 30]);
        assert_eq!(dir.referenced_segments().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(dir.records_in(2), 2);
    }

    #[test]
    fn test_encode_is_ordered() {
        let mut dir = Directory::new();
        dir.insert(9, entry(1, 24, 24));
        dir.insert(3, entry(1, 0, 24));

        let (active, entries) = format::decode_directory(&dir.encode(1)).unwrap();
        assert_eq!(active, 1);
        assert_eq!(entries.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![3, 9]);
    }
}
