//! Segment files on the local filesystem
//!
//! Layout of a store directory:
//!
//! ```text
//! <root>/seg-0000000000000001.hrth   record segments, one active at a time
//! <root>/seg-0000000000000002.hrth
//! <root>/directory.hdir              latest directory block
//! <root>/LOCK                        held exclusively while a volume is open
//! ```
//!
//! The directory block is replaced with the atomic rename pattern:
//! 1. Write `directory.hdir.tmp`
//! 2. durable_sync the temp file
//! 3. Rename it over `directory.hdir` (atomic on POSIX)
//! 4. durable_sync the parent directory

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{StoreError, StoreResult};
use crate::platform_durability::{durable_sync, sync_directory};
use crate::volume::Volume;

const SEGMENT_PREFIX: &str = "seg-";
const SEGMENT_SUFFIX: &str = ".hrth";
const DIRECTORY_FILE: &str = "directory.hdir";
const DIRECTORY_TEMP_FILE: &str = "directory.hdir.tmp";
const LOCK_FILE: &str = "LOCK";

/// Open append handle for the segment currently being written.
struct SegmentWriter {
    segment: u64,
    file: File,
    size: u64,
}

/// Volume backed by a directory of segment files.
pub struct FileVolume {
    root: PathBuf,
    writer: Option<SegmentWriter>,
    /// Released when the volume is dropped
    _lock: File,
}

impl FileVolume {
    /// Open (creating if needed) a volume rooted at `root`.
    ///
    /// Takes an exclusive advisory lock on `<root>/LOCK`. Opening a store
    /// runs recovery, which deletes unreferenced segments; a second handle
    /// on a live store would delete segments the owner is still writing.
    /// Fails with [`StoreError::Locked`] while another handle holds it.
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::io_at(&root, &e, "Failed to create store directory"))?;

        let lock_path = root.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io_at(&lock_path, &e, "Failed to open lock file"))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked { path: root });
        }

        Ok(Self { root, writer: None, _lock: lock })
    }

    /// Directory holding the segment files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `segment`.
    pub fn segment_path(&self, segment: u64) -> PathBuf {
        self.root.join(format!("{}{:016x}{}", SEGMENT_PREFIX, segment, SEGMENT_SUFFIX))
    }

    fn parse_segment_name(name: &str) -> Option<u64> {
        let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
        u64::from_str_radix(hex, 16).ok()
    }

    /// Append handle for `segment`, reusing the cached one when possible.
    fn writer_for(&mut self, segment: u64) -> StoreResult<&mut SegmentWriter> {
        let cached = matches!(&self.writer, Some(w) if w.segment == segment);
        if !cached {
            let path = self.segment_path(segment);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StoreError::io_at(&path, &e, "Failed to open segment"))?;
            let size = file
                .metadata()
                .map_err(|e| StoreError::io_at(&path, &e, "Failed to stat segment"))?
                .len();
            self.writer = Some(SegmentWriter { segment, file, size });
        }
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(StoreError::consistency("segment writer missing after open")),
        }
    }

    fn drop_writer_for(&mut self, segment: u64) {
        if matches!(&self.writer, Some(w) if w.segment == segment) {
            self.writer = None;
        }
    }
}

impl Volume for FileVolume {
    fn segments(&self) -> StoreResult<Vec<u64>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::io_at(&self.root, &e, "Failed to read store directory"))?;

        let mut segments: Vec<u64> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(Self::parse_segment_name))
            .collect();
        segments.sort_unstable();
        Ok(segments)
    }

    fn create_segment(&mut self, segment: u64) -> StoreResult<()> {
        self.drop_writer_for(segment);
        let path = self.segment_path(segment);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StoreError::io_at(&path, &e, "Failed to create segment"))?;
        drop(file);
        sync_directory(&self.root)
            .map_err(|e| StoreError::io_at(&self.root, &e, "Failed to sync store directory"))?;
        Ok(())
    }

    fn append(&mut self, segment: u64, data: &[u8]) -> StoreResult<u64> {
        let path = self.segment_path(segment);
        let writer = self.writer_for(segment)?;
        let offset = writer.size;

        if let Err(e) = writer.file.write_all(data) {
            // Size of a partial write is unknown; re-stat on the next append
            self.writer = None;
            return Err(StoreError::io_at(&path, &e, "Segment write failed"));
        }

        writer.size += data.len() as u64;
        Ok(offset)
    }

    fn read_at(&self, segment: u64, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let path = self.segment_path(segment);
        let mut file = File::open(&path)
            .map_err(|e| StoreError::io_at(&path, &e, "Failed to open segment for read"))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io_at(&path, &e, "Failed to seek segment"))?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|e| {
            StoreError::io_at(&path, &e, &format!("Failed to read {} bytes at offset {}", len, offset))
        })?;
        Ok(buf)
    }

    fn segment_len(&self, segment: u64) -> StoreResult<u64> {
        if let Some(writer) = self.writer.as_ref().filter(|w| w.segment == segment) {
            return Ok(writer.size);
        }
        let path = self.segment_path(segment);
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| StoreError::io_at(&path, &e, "Failed to stat segment"))
    }

    fn sync_segment(&mut self, segment: u64) -> StoreResult<()> {
        let path = self.segment_path(segment);
        let result = match self.writer.as_ref().filter(|w| w.segment == segment) {
            Some(writer) => durable_sync(&writer.file),
            None => File::open(&path).and_then(|file| durable_sync(&file)),
        };
        result.map_err(|e| StoreError::io_at(&path, &e, "Segment durable_sync failed"))
    }

    fn remove_segment(&mut self, segment: u64) -> StoreResult<()> {
        self.drop_writer_for(segment);
        let path = self.segment_path(segment);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io_at(&path, &e, "Failed to remove segment")),
        }
        sync_directory(&self.root)
            .map_err(|e| StoreError::io_at(&self.root, &e, "Failed to sync store directory"))
    }

    fn read_directory(&self) -> StoreResult<Option<Vec<u8>>> {
        let path = self.root.join(DIRECTORY_FILE);
        match fs::read(&path) {
            Ok(block) => Ok(Some(block)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io_at(&path, &e, "Failed to read directory block")),
        }
    }

    fn write_directory(&mut self, block: &[u8]) -> StoreResult<()> {
        let temp_path = self.root.join(DIRECTORY_TEMP_FILE);
        let final_path = self.root.join(DIRECTORY_FILE);

        {
            let mut temp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| StoreError::io_at(&temp_path, &e, "Failed to create directory temp file"))?;
            temp.write_all(block)
                .map_err(|e| StoreError::io_at(&temp_path, &e, "Failed to write directory block"))?;
            durable_sync(&temp)
                .map_err(|e| StoreError::io_at(&temp_path, &e, "Failed to sync directory block"))?;
        }

        fs::rename(&temp_path, &final_path)
            .map_err(|e| StoreError::io_at(&final_path, &e, "Failed to rename directory block"))?;

        sync_directory(&self.root)
            .map_err(|e| StoreError::io_at(&self.root, &e, "Failed to sync store directory"))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
