//! In-memory volume.
//!
//! Suitable for unit and integration tests, and for gateways running
//! without persistent media where the store only has to survive a
//! restart of the persistence subsystem, not of the process.
//!
//! Clones share state, so a test can drop a store and reopen it over the
//! same volume to exercise recovery.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::volume::Volume;

#[derive(Debug, Default)]
struct MemoryState {
    segments: BTreeMap<u64, Vec<u8>>,
    directory: Option<Vec<u8>>,
    /// Appends left before an injected failure; `None` disables injection
    appends_until_failure: Option<usize>,
    /// Next directory write lands but reports an error
    fail_directory_after_write: bool,
    directory_writes: u64,
}

/// Volume holding segments and the directory block in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryVolume {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryVolume {
    /// Create an empty volume.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `appends` more appends succeed, then fail every append with an
    /// I/O error until [`MemoryVolume::clear_failure`] is called.
    pub fn fail_after(&self, appends: usize) {
        self.state.lock().appends_until_failure = Some(appends);
    }

    /// Stop injecting append failures.
    pub fn clear_failure(&self) {
        self.state.lock().appends_until_failure = None;
    }

    /// Make the next directory write replace the block and then fail, as a
    /// rename followed by a failed parent-directory sync would.
    pub fn fail_next_directory_write(&self) {
        self.state.lock().fail_directory_after_write = true;
    }

    /// Copy of one segment's bytes.
    pub fn segment_bytes(&self, segment: u64) -> Option<Vec<u8>> {
        self.state.lock().segments.get(&segment).cloned()
    }

    /// Number of directory blocks written so far.
    pub fn directory_writes(&self) -> u64 {
        self.state.lock().directory_writes
    }

    fn missing(segment: u64) -> StoreError {
        StoreError::Io {
            path: None,
            kind: std::io::ErrorKind::NotFound,
            message: format!("segment {} does not exist", segment),
        }
    }
}

impl Volume for MemoryVolume {
    fn segments(&self) -> StoreResult<Vec<u64>> {
        Ok(self.state.lock().segments.keys().copied().collect())
    }

    fn create_segment(&mut self, segment: u64) -> StoreResult<()> {
        self.state.lock().segments.insert(segment, Vec::new());
        Ok(())
    }

    fn append(&mut self, segment: u64, data: &[u8]) -> StoreResult<u64> {
        let mut state = self.state.lock();
        match state.appends_until_failure {
            Some(0) => {
                return Err(StoreError::Io {
                    path: None,
                    kind: std::io::ErrorKind::Other,
                    message: "injected append failure".to_string(),
                });
            }
            Some(ref mut left) => *left -= 1,
            None => {}
        }

        let bytes = state.segments.entry(segment).or_default();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn read_at(&self, segment: u64, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let state = self.state.lock();
        let bytes = state.segments.get(&segment).ok_or_else(|| Self::missing(segment))?;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if end > bytes.len() {
            return Err(StoreError::Io {
                path: None,
                kind: std::io::ErrorKind::UnexpectedEof,
                message: format!(
                    "read of {} bytes at offset {} past end of segment {} ({} bytes)",
                    len, offset, segment, bytes.len()
                ),
            });
        }
        Ok(bytes[start..end].to_vec())
    }

    fn segment_len(&self, segment: u64) -> StoreResult<u64> {
        let state = self.state.lock();
        state
            .segments
            .get(&segment)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| Self::missing(segment))
    }

    fn sync_segment(&mut self, _segment: u64) -> StoreResult<()> {
        Ok(())
    }

    fn remove_segment(&mut self, segment: u64) -> StoreResult<()> {
        self.state.lock().segments.remove(&segment);
        Ok(())
    }

    fn read_directory(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.state.lock().directory.clone())
    }

    fn write_directory(&mut self, block: &[u8]) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.directory = Some(block.to_vec());
        state.directory_writes += 1;
        if std::mem::take(&mut state.fail_directory_after_write) {
            return Err(StoreError::Io {
                path: None,
                kind: std::io::ErrorKind::Other,
                message: "injected directory sync failure".to_string(),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
