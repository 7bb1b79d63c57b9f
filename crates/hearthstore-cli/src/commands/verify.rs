//! Verify command implementation.

use std::path::Path;

use hearthstore_core::Config;

use super::open_existing;

/// Runs the verify command.
///
/// Opening the store already checks the directory block; this then reads
/// every live record back.
pub fn run(path: &Path, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let store = open_existing(path, config)?;
    match store.verify() {
        Ok(report) => {
            println!("  Records checked: {}", report.records_checked);
            println!("  Bytes checked:   {}", report.bytes_checked);
            println!();
            println!("✓ Store is consistent");
            Ok(())
        }
        Err(e) => {
            println!("✗ Verification failed: {}", e);
            Err(e.into())
        }
    }
}
