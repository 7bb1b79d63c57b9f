//! Compact command implementation.

use std::path::Path;

use hearthstore_core::{CompactionPolicy, Config};

use super::{open_existing, percent};

/// Runs the compact command.
pub fn run(path: &Path, config: &Config, if_needed: bool, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = open_existing(path, config)?;
    let policy = CompactionPolicy::from_config(config);

    println!("Compacting store at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    println!("Compaction Analysis:");
    println!("  Live records: {}", store.len());
    println!("  Size before:  {} bytes", store.total_bytes());
    println!("  Size after:   {} bytes", store.live_bytes());
    println!(
        "  Space saved:  {} bytes ({:.1}%)",
        store.stale_bytes(),
        percent(store.stale_bytes(), store.total_bytes())
    );

    if dry_run {
        return Ok(());
    }

    println!();
    if store.stale_bytes() == 0 {
        println!("No compaction needed - store holds no stale records");
        return Ok(());
    }
    if if_needed && !policy.compaction_required(&store) {
        println!(
            "No compaction needed - stale ratio below {:.1}%",
            policy.trigger_ratio() * 100.0
        );
        return Ok(());
    }

    println!("Performing compaction...");
    let report = policy.compact(&mut store)?;
    println!(
        "✓ Compaction complete: {} records, {} segments removed, {} bytes saved",
        report.live_records,
        report.segments_removed,
        report.bytes_saved()
    );
    Ok(())
}
