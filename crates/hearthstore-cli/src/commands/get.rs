//! Get command implementation.

use std::io::Write;
use std::path::Path;

use hearthstore_core::Config;

use super::open_existing;

/// Runs the get command.
pub fn run(path: &Path, config: &Config, id: u64, raw: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path, config)?;
    let Some(payload) = store.read_latest(id)? else {
        return Err(format!("Resource {} not found in store", id).into());
    };

    if raw {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&payload)?;
        stdout.flush()?;
        return Ok(());
    }

    println!("Resource {} ({} bytes)", id, payload.len());
    for line in hex_dump(&payload) {
        println!("{}", line);
    }
    Ok(())
}

/// Classic 16-bytes-per-row dump: offset, hex, printable ASCII.
fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!("{:08x}  {:<47}  |{}|", row * 16, hex.join(" "), ascii)
        })
        .collect()
}
