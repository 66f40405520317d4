//! Store directory management.
//!
//! ```text
//! <mirror_path>/
//! ├─ LOCK          # Advisory lock for single-process access
//! ├─ MANIFEST      # Id, versions, settings, last checkpoint
//! ├─ snapshot.dat  # Checkpointed full state
//! └─ journal.log   # Batches committed since the snapshot
//! ```

use crate::error::{DbError, DbResult};
use crate::manifest::Manifest;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "snapshot.dat";
const SNAPSHOT_TEMP: &str = "snapshot.dat.tmp";
const JOURNAL_FILE: &str = "journal.log";

/// Holds the store directory and its exclusive lock.
///
/// The lock is released by [`StoreDir::release_lock`] or on drop.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    lock_file: Mutex<Option<File>>,
}

impl StoreDir {
    /// Opens or creates a store directory and takes the lock.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process holds the directory, and an
    /// invalid-operation error if the path is missing and
    /// `create_if_missing` is false or the path is not a directory.
    pub fn open(path: &Path, create_if_missing: bool) -> DbResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(DbError::invalid_operation(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(DbError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(DbError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Mutex::new(Some(lock_file)),
        })
    }

    /// Releases the directory lock. Later calls do nothing.
    pub fn release_lock(&self) {
        if let Some(file) = self.lock_file.lock().take() {
            let _ = FileExt::unlock(&file);
        }
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Returns the path of the MANIFEST file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Returns the path of the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Returns true if nothing has been written here yet.
    #[must_use]
    pub fn is_new_store(&self) -> bool {
        !self.manifest_path().exists()
            && !self.journal_path().exists()
            && !self.snapshot_path().exists()
    }

    /// Loads the manifest. Returns `None` for a new store.
    pub fn load_manifest(&self) -> DbResult<Option<Manifest>> {
        match read_optional(&self.manifest_path())? {
            Some(data) if !data.is_empty() => Ok(Some(Manifest::decode(&data)?)),
            _ => Ok(None),
        }
    }

    /// Saves the manifest atomically.
    pub fn save_manifest(&self, manifest: &Manifest) -> DbResult<()> {
        self.write_atomic(MANIFEST_TEMP, MANIFEST_FILE, &manifest.encode()?)
    }

    /// Loads the raw snapshot, if one has been written.
    pub fn load_snapshot(&self) -> DbResult<Option<Vec<u8>>> {
        read_optional(&self.snapshot_path())
    }

    /// Replaces the snapshot atomically.
    pub fn save_snapshot(&self, data: &[u8]) -> DbResult<()> {
        self.write_atomic(SNAPSHOT_TEMP, SNAPSHOT_FILE, data)
    }

    /// Write-then-rename, then fsync the directory so the rename is durable.
    fn write_atomic(&self, temp_name: &str, final_name: &str, data: &[u8]) -> DbResult<()> {
        let temp_path = self.path.join(temp_name);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(final_name))?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> DbResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> DbResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

fn read_optional(path: &Path) -> DbResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DnPolicy;
    use crate::version::Version;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("mirror");

        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.exists());
        assert!(path.join(LOCK_FILE).exists());
        assert!(dir.is_new_store());
    }

    #[test]
    fn open_missing_without_create_fails() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("absent"), false);
        assert!(matches!(result, Err(DbError::InvalidOperation { .. })));
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _first = StoreDir::open(temp.path(), true).unwrap();
        assert!(matches!(
            StoreDir::open(temp.path(), true),
            Err(DbError::Locked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(StoreDir::open(temp.path(), true).unwrap());
        assert!(StoreDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn release_lock_allows_reopen() {
        let temp = tempdir().unwrap();
        let first = StoreDir::open(temp.path(), true).unwrap();
        first.release_lock();
        first.release_lock();
        assert!(StoreDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn manifest_save_load() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();
        assert!(dir.load_manifest().unwrap().is_none());

        let manifest = Manifest::new(
            Version::from([1, 0]),
            Version::from([1, 0]),
            DnPolicy::CaseSensitive,
        );
        dir.save_manifest(&manifest).unwrap();

        assert_eq!(dir.load_manifest().unwrap(), Some(manifest));
        assert!(!dir.is_new_store());
        assert!(!temp.path().join(MANIFEST_TEMP).exists());
    }

    #[test]
    fn snapshot_save_replaces() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();
        assert!(dir.load_snapshot().unwrap().is_none());

        dir.save_snapshot(b"first").unwrap();
        dir.save_snapshot(b"second").unwrap();
        assert_eq!(dir.load_snapshot().unwrap().unwrap(), b"second");
    }
}
