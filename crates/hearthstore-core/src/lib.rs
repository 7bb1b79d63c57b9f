//! HearthStore Core — persistence engine for a gateway resource graph
//!
//! The resource tree keeps the live graph in memory. HearthStore makes it
//! survive restarts: mutations are tracked, flushed periodically as
//! append-only records, and compacted once stale space piles up.
//!
//! # Architecture
//!
//! - **Change tracking**: mutators report create/modify/delete; repeated
//!   notifications for one resource fold into a single pending change
//! - **Durable store**: append-only record segments plus a directory block
//!   mapping each resource to its latest record
//! - **Compaction**: rewrites only the live records once the stale byte
//!   ratio crosses a threshold
//! - **Timed persistence**: background flush every period, suppressed while
//!   a transaction is open, never two cycles at once
//!
//! Nothing here knows resource types or encodings; the tree serializes
//! through [`ResourceTree`].

pub mod compaction;
pub mod config;
pub mod directory;
pub mod error;
pub mod format;
pub mod persistence;
pub mod platform_durability;
pub mod resource;
pub mod scheduler;
pub mod store;
pub mod tracker;
pub mod volume;

/// Identifier of a resource node, unique for the lifetime of the tree.
pub type ResourceId = u64;

// Re-export key types for convenience
pub use compaction::{CompactionPolicy, CompactionReport};
pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use persistence::{
    AbortReason, CycleOutcome, CycleReport, PersistencePolicy, PersistenceStats, SkipReason,
    TimedPersistence,
};
pub use resource::{ResourceTree, SerializeError};
pub use scheduler::{CancellationToken, PeriodicTask};
pub use store::{DurableStore, SegmentInfo, VerifyReport};
pub use tracker::{Change, ChangeKind, ChangeTracker, MergeOutcome};
pub use volume::{FileVolume, MemoryVolume, Volume};
