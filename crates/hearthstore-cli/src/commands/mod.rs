//! CLI command implementations.

pub mod compact;
pub mod get;
pub mod inspect;
pub mod verify;

use std::path::Path;

use hearthstore_core::{Config, DurableStore};
use tracing::debug;

/// Open an existing store, refusing to create one.
///
/// Opening runs recovery, so unreferenced segments left by a crash are
/// removed as a side effect.
pub fn open_existing(path: &Path, config: &Config) -> Result<DurableStore, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {:?}", path).into());
    }
    debug!(path = %path.display(), "Opening store");
    Ok(DurableStore::open_dir(path, config)?)
}

/// Percentage of `part` in `whole`, 0 for an empty whole.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
