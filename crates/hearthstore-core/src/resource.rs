//! Contract with the resource tree that owns the live graph.
//!
//! The persistence engine never holds resource nodes. At flush time it asks
//! the tree for the current serialized form of each changed id; everything
//! about types, paths and encodings stays on the tree's side.

use thiserror::Error;

use crate::ResourceId;

/// The tree could not encode a resource.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct SerializeError {
    /// Why encoding failed
    pub reason: String,
}

impl SerializeError {
    /// Create an error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Read access to the live resource graph.
pub trait ResourceTree: Send + Sync {
    /// Current serialized payload of `id`.
    ///
    /// `Ok(None)` means the tree no longer knows the id; the flush cycle
    /// skips it and waits for the deletion notification.
    fn serialize(&self, id: ResourceId) -> Result<Option<Vec<u8>>, SerializeError>;

    /// Ids of every resource currently alive in the tree.
    fn live_ids(&self) -> Vec<ResourceId>;
}
