//! syncrepl-db
//!
//! Command-line tools for inspecting and maintaining a mirror store.
//!
//! # Commands
//!
//! - `inspect` - Display versions, search, cookie and counts
//! - `dump` - Dump mirrored entries as JSON
//! - `verify` - Open the store and check its invariants
//! - `checkpoint` - Fold the journal into the snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Mirror store maintenance tools.
#[derive(Parser)]
#[command(name = "syncrepl-db")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the mirror directory
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
    /// Display versions, search, cookie and counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump mirrored entries as JSON
    Dump {
        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only dump entries whose DN ends with this suffix
        #[arg(short, long)]
        suffix: Option<String>,
    },

    /// Open the store and check its invariants
    Verify,

    /// Fold the journal into the snapshot
    Checkpoint,

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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Mirror path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump { limit, suffix } => {
            let path = cli.path.ok_or("Mirror path required for dump")?;
            commands::dump::run(&path, limit, suffix.as_deref())?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Mirror path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Mirror path required for checkpoint")?;
            commands::checkpoint::run(&path)?;
        }
        Commands::Version => {
            println!("syncrepl-db v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Store format v{}",
                syncrepl_core::Version::from(syncrepl_core::ENGINE_FORMAT_VERSION)
            );
            println!(
                "Host runtime v{}",
                syncrepl_core::Version::from(syncrepl_core::HOST_RUNTIME_VERSION)
            );
        }
    }

    Ok(())
}
