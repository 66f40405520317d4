//! Test fixtures and mirror helpers.
//!
//! Provides convenience functions for setting up test mirrors and
//! comparing their contents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use syncrepl_core::{Cookie, DbResult, Entry, Scope, SequenceNumber, Store, UrlDescriptor};
use tempfile::TempDir;

/// Base DN used by the sample data.
pub const SAMPLE_BASE_DN: &str = "ou=people,dc=example,dc=com";

/// A test mirror with automatic cleanup.
pub struct TestMirror {
    /// The store instance.
    pub store: Store,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestMirror {
    /// Creates a new in-memory test mirror.
    pub fn memory() -> Self {
        Self {
            store: Store::open_in_memory().expect("Failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// Creates a new mirror in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(&temp_dir.path().join("mirror")).expect("Failed to open store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the mirror directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("mirror"))
    }
}

impl std::ops::Deref for TestMirror {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory mirror.
pub fn with_temp_mirror<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let mirror = TestMirror::memory();
    f(&mirror.store)
}

/// Runs a test with a mirror in a temporary directory.
pub fn with_file_mirror<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let mirror = TestMirror::file();
    let path = mirror.path().expect("File mirror should have a path");
    f(&mirror.store, &path)
}

/// The search used by the sample data.
pub fn sample_descriptor() -> UrlDescriptor {
    UrlDescriptor::new(SAMPLE_BASE_DN, Scope::Subtree, "(objectClass=person)", ["cn", "mail"])
}

/// DN of a sample person.
pub fn sample_dn(name: &str) -> String {
    format!("cn={name},{SAMPLE_BASE_DN}")
}

/// A sample person entry.
pub fn sample_entry(name: &str) -> Entry {
    let mail = format!("{name}@example.com");
    Entry::new(sample_dn(name))
        .with_text("cn", &[name])
        .with_text("mail", &[mail.as_str()])
        .with_text("objectClass", &["person"])
}

/// Everything a store holds, for before/after comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreImage {
    /// Entries by DN as delivered.
    pub entries: BTreeMap<String, Entry>,
    /// Stored cookie.
    pub cookie: Option<Cookie>,
    /// Stored search.
    pub descriptor: Option<UrlDescriptor>,
    /// Last committed sequence.
    pub sequence: SequenceNumber,
}

impl StoreImage {
    /// Captures the current contents of `store`.
    pub fn capture(store: &Store) -> DbResult<Self> {
        let mut entries = BTreeMap::new();
        for dn in store.all_dns()? {
            if let Some(entry) = store.get(&dn)? {
                entries.insert(dn, entry);
            }
        }
        Ok(Self {
            entries,
            cookie: store.cookie()?,
            descriptor: store.descriptor()?,
            sequence: store.sequence(),
        })
    }

    /// Returns the DNs in the image.
    pub fn dns(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a mirror holding `count` people, the sample search and a cookie.
    pub fn populated_mirror(count: usize) -> TestMirror {
        let mirror = TestMirror::memory();
        mirror
            .transaction(|txn| {
                txn.set_descriptor(sample_descriptor())?;
                for i in 0..count {
                    txn.put(sample_entry(&format!("user{i:04}")))?;
                }
                txn.set_cookie(Cookie::from("rid=001,csn=populated"))
            })
            .expect("Failed to populate mirror");
        mirror
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_mirror() {
        let mirror = TestMirror::memory();
        assert!(mirror.path().is_none());
        assert_eq!(mirror.entry_count().unwrap(), 0);
    }

    #[test]
    fn file_mirror_has_path() {
        with_file_mirror(|store, path| {
            assert!(path.join("MANIFEST").exists());
            assert_eq!(store.path(), Some(path));
        });
    }

    #[test]
    fn populated_scenario() {
        let mirror = scenarios::populated_mirror(10);
        let image = StoreImage::capture(&mirror).unwrap();
        assert_eq!(image.entries.len(), 10);
        assert_eq!(image.descriptor, Some(sample_descriptor()));
        assert!(image.cookie.is_some());
        assert_eq!(image.dns()[0], sample_dn("user0000"));
    }
}
