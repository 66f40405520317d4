//! Checkpoint command implementation.

use super::open_existing;
use std::path::Path;
use syncrepl_core::{DbResult, Store};

/// Journal sizes around a checkpoint.
#[derive(Debug, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Journal bytes before.
    pub bytes_before: u64,
    /// Journal bytes after.
    pub bytes_after: u64,
    /// Entries written to the snapshot.
    pub entries: usize,
}

/// Checkpoints an open store.
pub fn checkpoint_store(store: &Store) -> DbResult<CheckpointStats> {
    let bytes_before = store.journal_size()?;
    store.checkpoint()?;
    Ok(CheckpointStats {
        bytes_before,
        bytes_after: store.journal_size()?,
        entries: store.entry_count()?,
    })
}

/// Runs the checkpoint command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checkpointing mirror at {:?}", path);

    let store = open_existing(path)?;
    let stats = checkpoint_store(&store)?;
    store.close()?;

    println!("  Entries in snapshot: {}", stats.entries);
    println!(
        "  Journal: {} bytes -> {} bytes",
        stats.bytes_before, stats.bytes_after
    );
    Ok(())
}
