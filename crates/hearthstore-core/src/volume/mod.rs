//! Storage volumes: where segments and the directory block physically live.
//!
//! A volume is an opaque byte store. It knows nothing about records or
//! directory entries; [`crate::store::DurableStore`] owns every format
//! decision and drives the volume through this trait.
//!
//! # Invariants
//!
//! - `append` returns the offset where the data starts, which is the segment
//!   length before the call
//! - `read_at` returns exactly the bytes previously appended at that offset
//! - `write_directory` replaces the previous block atomically: a reader sees
//!   either the old block or the new one, never a mix

mod file;
mod memory;

pub use file::FileVolume;
pub use memory::MemoryVolume;

use crate::error::StoreResult;

/// Backing storage for a [`crate::store::DurableStore`].
pub trait Volume: Send {
    /// Sequence numbers of every segment present, ascending.
    fn segments(&self) -> StoreResult<Vec<u64>>;

    /// Create an empty segment, truncating any leftover with the same number.
    fn create_segment(&mut self, segment: u64) -> StoreResult<()>;

    /// Append `data` to `segment`. Returns the offset of its first byte.
    fn append(&mut self, segment: u64, data: &[u8]) -> StoreResult<u64>;

    /// Read `len` bytes of `segment` starting at `offset`.
    fn read_at(&self, segment: u64, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Current length of `segment` in bytes.
    fn segment_len(&self, segment: u64) -> StoreResult<u64>;

    /// Make everything appended to `segment` durable.
    fn sync_segment(&mut self, segment: u64) -> StoreResult<()>;

    /// Delete `segment`.
    fn remove_segment(&mut self, segment: u64) -> StoreResult<()>;

    /// The last directory block written, if any.
    fn read_directory(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Durably replace the directory block.
    fn write_directory(&mut self, block: &[u8]) -> StoreResult<()>;

    /// Short human-readable location, used in log lines.
    fn describe(&self) -> String;
}
