//! Inspect command implementation.

use std::path::Path;

use hearthstore_core::Config;

use super::{open_existing, percent};

/// Runs the inspect command.
pub fn run(path: &Path, config: &Config, show_segments: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path, config)?;

    println!("Store at {:?}", path);
    println!();
    println!("  Resources:      {}", store.len());
    println!("  Segments:       {}", store.segments().len());
    println!("  Active segment: {}", store.active_segment());
    println!("  Total bytes:    {}", store.total_bytes());
    println!("  Live bytes:     {}", store.live_bytes());
    println!(
        "  Stale bytes:    {} ({:.1}%)",
        store.stale_bytes(),
        percent(store.stale_bytes(), store.total_bytes())
    );
    println!(
        "  Compaction at:  {:.1}% stale",
        config.compaction_trigger_ratio * 100.0
    );

    if show_segments {
        println!();
        println!("  {:>8}  {:>12}  {:>8}", "segment", "bytes", "live");
        for info in store.segments() {
            println!(
                "  {:>8}  {:>12}  {:>8}{}",
                info.segment,
                info.bytes,
                info.live_records,
                if info.active { "  (active)" } else { "" }
            );
        }
    }

    Ok(())
}
