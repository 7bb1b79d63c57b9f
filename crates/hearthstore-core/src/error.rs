//! Error types for HearthStore operations
//!
//! Every failure the persistence engine can hit is a [`StoreError`]. Variants
//! carry enough context (file, offset, resource id) to diagnose a damaged store
//! without reopening it in a debugger.

use std::path::PathBuf;

use thiserror::Error;

use crate::ResourceId;

/// HearthStore error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", display_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Checksum verification failed for a stored record
    #[error("Checksum mismatch in segment {segment} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch {
        /// Segment holding the record
        segment: u64,
        /// Byte offset of the record
        offset: u64,
        /// Checksum stored in the header
        expected: u32,
        /// Checksum computed over the bytes read
        actual: u32,
    },

    /// Magic bytes not found where a record or directory block should start
    #[error("Magic bytes not found in {location} at offset {offset}: found {found_bytes:02x?}")]
    NoMagicFound {
        /// Segment or directory block being read
        location: String,
        /// Offset where magic was expected
        offset: u64,
        /// Bytes actually found
        found_bytes: [u8; 4],
    },

    /// Record is shorter than its header claims (partial write at end of segment)
    #[error("Torn record in segment {segment} at offset {offset}: expected {expected_size} bytes, only {available_bytes} available")]
    TornRecord {
        /// Segment holding the record
        segment: u64,
        /// Offset where the record begins
        offset: u64,
        /// Size announced by the header
        expected_size: u64,
        /// Bytes actually available
        available_bytes: u64,
    },

    /// Serialized payload exceeds the configured record limit
    #[error("Record for resource {id} too large: {size} bytes exceeds limit of {max_size} bytes")]
    OversizedRecord {
        /// Resource whose payload was rejected
        id: ResourceId,
        /// Size of the oversized payload
        size: u64,
        /// Maximum allowed payload size
        max_size: u64,
    },

    /// The resource tree could not produce a payload for a resource
    #[error("Serialization of resource {id} failed: {reason}")]
    Serialization {
        /// Resource that failed to serialize
        id: ResourceId,
        /// Reason reported by the serializer
        reason: String,
    },

    /// Directory and record files disagree; the store needs manual repair
    #[error("Store inconsistent: {reason}")]
    Consistency {
        /// Description of the inconsistency
        reason: String,
    },

    /// Configuration rejected by [`crate::Config::validate`]
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Another handle, in this or another process, owns the store directory
    #[error("Store at {} is locked by another handle", .path.display())]
    Locked {
        /// Store directory
        path: PathBuf,
    },

    /// `start_storage` called while the periodic flush is already running
    #[error("Storage already started")]
    AlreadyStarted,
}

impl StoreError {
    /// Build an [`StoreError::Io`] from an I/O error and the path it concerns.
    pub fn io_at(path: impl Into<PathBuf>, err: &std::io::Error, context: &str) -> Self {
        StoreError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }

    /// Build a [`StoreError::Consistency`].
    pub fn consistency(reason: impl Into<String>) -> Self {
        StoreError::Consistency { reason: reason.into() }
    }

    /// True for failures confined to a single record.
    ///
    /// A flush cycle skips the record and carries on; every other error
    /// aborts the rest of the cycle.
    pub fn is_record_local(&self) -> bool {
        matches!(self, StoreError::Serialization { .. } | StoreError::OversizedRecord { .. })
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

/// Convert std::io::Error to StoreError::Io
impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for HearthStore operations
pub type StoreResult<T> = Result<T, StoreError>;
