//! HearthStore CLI
//!
//! Maintenance tools for a HearthStore record store directory.
//!
//! # Commands
//!
//! - `inspect` - Display directory and segment statistics
//! - `verify` - Check every live record
//! - `compact` - Rewrite live records to reclaim stale space
//! - `get` - Dump the latest payload of one resource

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// HearthStore command-line store tools.
#[derive(Parser)]
#[command(name = "hearthstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display directory and segment statistics
    Inspect {
        /// Show per-segment details
        #[arg(short, long)]
        segments: bool,
    },

    /// Read back every live record and check its checksum
    Verify,

    /// Compact segments to reclaim space
    Compact {
        /// Only compact when the stale ratio exceeds the configured threshold
        #[arg(short, long)]
        if_needed: bool,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump the latest payload of a resource
    Get {
        /// Resource id
        id: u64,

        /// Write the payload bytes to stdout unchanged
        #[arg(short, long)]
        raw: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = hearthstore_core::Config::from_env();
    config.validate()?;

    match cli.command {
        Commands::Inspect { segments } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &config, segments)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &config)?;
        }
        Commands::Compact { if_needed, dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, &config, if_needed, dry_run)?;
        }
        Commands::Get { id, raw } => {
            let path = cli.path.ok_or("Store path required for get")?;
            commands::get::run(&path, &config, id, raw)?;
        }
        Commands::Version => {
            println!("HearthStore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
