//! Verify command implementation.

use super::open_existing;
use std::path::Path;
use syncrepl_core::{DbResult, Store};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of entries checked.
    pub entries_checked: usize,
    /// Repairs and recoveries made while opening.
    pub notes: Vec<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if no invariant is broken.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks an open store.
pub fn verify_store(store: &Store) -> DbResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let report = store.open_report();

    if report.torn_bytes > 0 {
        result
            .notes
            .push(format!("discarded {} bytes of torn journal tail", report.torn_bytes));
    }
    if report.skipped_batches > 0 {
        result.notes.push(format!(
            "skipped {} journal batches already in the snapshot",
            report.skipped_batches
        ));
    }
    if report.compatibility.needs_migration() {
        result.notes.push(format!("migrated entries: {:?}", report.compatibility));
    }
    for warning in &report.warnings {
        result.notes.push(warning.to_string());
    }

    let descriptor = store.descriptor()?;
    if store.cookie()?.is_some() && descriptor.is_none() {
        result
            .errors
            .push("cookie stored without a search descriptor".to_string());
    }

    let dns = store.all_dns()?;
    let listed = dns.len();
    for dn in dns {
        result.entries_checked += 1;
        if dn.is_empty() {
            result.errors.push("entry with an empty DN".to_string());
            continue;
        }
        match store.get(&dn)? {
            Some(entry) if entry.dn != dn => result
                .errors
                .push(format!("{dn}: stored under a different DN {:?}", entry.dn)),
            Some(_) => {}
            None => result.errors.push(format!("{dn}: listed but not readable")),
        }
    }

    let count = store.entry_count()?;
    if count != listed {
        result
            .errors
            .push(format!("entry count {count} does not match {listed} listed DNs"));
    }

    let absent = store.absent_dns()?.len();
    if absent > 0 {
        result.notes.push(format!(
            "{absent} entries unconfirmed by an interrupted present phase"
        ));
    }

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying mirror at {:?}", path);
    println!();

    let store = open_existing(path)?;
    let result = verify_store(&store)?;
    store.close()?;

    println!("  Entries checked: {}", result.entries_checked);
    for note in &result.notes {
        println!("  Note: {}", note);
    }
    for error in &result.errors {
        println!("  Error: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Mirror verification passed");
        Ok(())
    } else {
        println!("✗ Mirror verification failed");
        Err("Verification failed".into())
    }
}
