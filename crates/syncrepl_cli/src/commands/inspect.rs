//! Inspect command implementation.

use super::open_existing;
use serde::Serialize;
use std::path::Path;
use syncrepl_core::{DbResult, Store};

/// Mirror inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Mirror path.
    pub path: String,
    /// Store id from the manifest.
    pub store_id: String,
    /// Store format version.
    pub format_version: String,
    /// Host runtime version the entries were written with.
    pub runtime_version: String,
    /// DN case policy.
    pub dn_policy: String,
    /// Last committed sequence.
    pub sequence: u64,
    /// Sequence of the last checkpoint.
    pub last_checkpoint: Option<u64>,
    /// Stored search in URL form.
    pub descriptor: Option<String>,
    /// Stored cookie, hex encoded.
    pub cookie: Option<String>,
    /// Number of mirrored entries.
    pub entry_count: usize,
    /// Entries not confirmed by the last present phase.
    pub absent_count: usize,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Journal batches replayed while opening.
    pub replayed_batches: usize,
    /// Torn journal bytes discarded while opening.
    pub torn_bytes: u64,
}

impl InspectResult {
    /// Collects the inspection result from an open store.
    pub fn collect(store: &Store, path: &Path) -> DbResult<Self> {
        let manifest = store.manifest();
        let report = store.open_report();
        Ok(Self {
            path: path.display().to_string(),
            store_id: manifest.store_id.to_string(),
            format_version: manifest.format_version.to_string(),
            runtime_version: manifest.runtime_version.to_string(),
            dn_policy: manifest.dn_policy.to_string(),
            sequence: store.sequence().0,
            last_checkpoint: manifest.last_checkpoint.map(|s| s.0),
            descriptor: store.descriptor()?.map(|d| d.to_string()),
            cookie: store.cookie()?.map(|c| c.to_hex()),
            entry_count: store.entry_count()?,
            absent_count: store.absent_dns()?.len(),
            journal_size: store.journal_size()?,
            replayed_batches: report.replayed_batches,
            torn_bytes: report.torn_bytes,
        })
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let result = InspectResult::collect(&store, path)?;
    store.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Mirror: {}", result.path);
    println!("  Store id:        {}", result.store_id);
    println!("  Format version:  {}", result.format_version);
    println!("  Runtime version: {}", result.runtime_version);
    println!("  DN policy:       {}", result.dn_policy);
    println!();
    println!("Session:");
    println!(
        "  Search: {}",
        result.descriptor.as_deref().unwrap_or("(none)")
    );
    println!("  Cookie: {}", result.cookie.as_deref().unwrap_or("(none)"));
    println!();
    println!("Contents:");
    println!("  Entries:  {}", result.entry_count);
    if result.absent_count > 0 {
        println!("  Absent:   {} (present phase interrupted)", result.absent_count);
    }
    println!("  Sequence: {}", result.sequence);
    match result.last_checkpoint {
        Some(sequence) => println!("  Checkpoint: {}", sequence),
        None => println!("  Checkpoint: (never)"),
    }
    println!(
        "  Journal:  {} bytes, {} batches replayed",
        result.journal_size, result.replayed_batches
    );
    if result.torn_bytes > 0 {
        println!("  Torn tail discarded: {} bytes", result.torn_bytes);
    }
}
