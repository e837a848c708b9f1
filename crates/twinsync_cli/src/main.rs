//! TwinSync CLI
//!
//! Command-line tools for synchronizing repository snapshots.
//!
//! # Commands
//!
//! - `transform` - Synchronize a target snapshot from a source snapshot
//! - `inspect` - Display snapshot statistics and provenance scopes

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use twinsync_core::Id64;

/// TwinSync command-line tools.
#[derive(Parser)]
#[command(name = "twinsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize a target snapshot from a source snapshot
    Transform {
        /// Source snapshot
        source: PathBuf,

        /// Target snapshot, created if missing
        target: PathBuf,

        /// Element anchoring provenance in the target (hex or decimal id)
        #[arg(short, long)]
        scope: Option<String>,

        /// Only synchronize source changes after this change sequence
        #[arg(long)]
        since: Option<u64>,

        /// Write dangling references as invalid instead of failing
        #[arg(long)]
        ignore_dangling: bool,

        /// Merge a branch back into the repository it came from
        #[arg(short, long)]
        reverse: bool,

        /// Suppress provenance writes
        #[arg(long)]
        no_provenance: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display snapshot statistics and provenance scopes
    Inspect {
        /// Snapshot to inspect
        snapshot: PathBuf,

        /// Show the provenance scopes
        #[arg(short, long)]
        provenance: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Transform {
            source,
            target,
            scope,
            since,
            ignore_dangling,
            reverse,
            no_provenance,
            format,
        } => {
            let scope = scope.map(|s| s.parse::<Id64>()).transpose()?;
            let request = commands::transform::TransformRequest {
                source,
                target,
                scope,
                since,
                ignore_dangling,
                reverse,
                no_provenance,
            };
            let summary = commands::transform::run(&request)?;
            commands::transform::print(&summary, &format)?;
        }
        Commands::Inspect {
            snapshot,
            provenance,
            format,
        } => {
            commands::inspect::run(&snapshot, provenance, &format)?;
        }
        Commands::Version => {
            println!("TwinSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
