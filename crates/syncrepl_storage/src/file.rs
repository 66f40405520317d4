//! File journal backend.

use crate::backend::StorageBackend;
use crate::error::{check_range, StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct OpenFile {
    file: File,
    len: u64,
    synced_len: u64,
}

/// The journal file of an on-disk mirror.
///
/// `flush()` hands bytes to the OS; `sync()` calls `File::sync_data()`,
/// which covers the length change of an append. Errors carry the file path.
///
/// # Example
///
/// ```no_run
/// use syncrepl_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut journal = FileBackend::open(Path::new("mirror/journal.log")).unwrap();
/// journal.append(b"batch").unwrap();
/// journal.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<OpenFile>,
}

impl FileBackend {
    /// Opens the journal at `path`, creating an empty one if missing.
    ///
    /// Whatever is already in the file counts as durable.
    ///
    /// # Errors
    ///
    /// [`StorageError::File`] if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::file(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| StorageError::file(path, e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(OpenFile {
                file,
                len,
                synced_len: len,
            }),
        })
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wrap(&self, e: io::Error) -> StorageError {
        StorageError::file(&self.path, e)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        check_range(offset, len, inner.len)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; len];
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| inner.file.read_exact(&mut buffer))
            .map_err(|e| self.wrap(e))?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.len;
        if data.is_empty() {
            return Ok(offset);
        }

        let written = inner
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| inner.file.write_all(data));
        if let Err(e) = written {
            // Some bytes may have landed; the journal finds them on reopen.
            inner.len = inner.file.metadata().map(|m| m.len()).unwrap_or(offset);
            return Err(StorageError::file(&self.path, e));
        }
        inner.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let path = &self.path;
        self.inner
            .get_mut()
            .file
            .flush()
            .map_err(|e| StorageError::file(path, e))
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        inner
            .file
            .sync_data()
            .map_err(|e| StorageError::file(&self.path, e))?;
        inner.synced_len = inner.len;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.len {
            return Err(StorageError::TruncateGrows {
                requested: new_size,
                size: inner.len,
            });
        }

        inner
            .file
            .set_len(new_size)
            .and_then(|()| inner.file.sync_all())
            .map_err(|e| StorageError::file(&self.path, e))?;
        inner.len = new_size;
        inner.synced_len = new_size;
        Ok(())
    }

    fn durable_size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().synced_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_an_empty_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let journal = FileBackend::open(&path).unwrap();
        assert_eq!(journal.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(journal.path(), path);
    }

    #[test]
    fn batches_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            let mut journal = FileBackend::open(&path).unwrap();
            assert_eq!(journal.append(b"first").unwrap(), 0);
            assert_eq!(journal.append(b"second").unwrap(), 5);
            assert_eq!(journal.durable_size().unwrap(), 0);
            journal.sync().unwrap();
            assert_eq!(journal.durable_size().unwrap(), 11);
        }

        let journal = FileBackend::open(&path).unwrap();
        assert_eq!(journal.read_all().unwrap(), b"firstsecond");
        assert_eq!(&journal.read_at(5, 6).unwrap(), b"second");
        assert_eq!(journal.durable_size().unwrap(), 11);
    }

    #[test]
    fn reads_outside_the_file_fail() {
        let dir = tempdir().unwrap();
        let mut journal = FileBackend::open(&dir.path().join("journal.log")).unwrap();
        journal.append(b"batch").unwrap();

        assert!(matches!(
            journal.read_at(3, 5),
            Err(StorageError::OutOfRange { offset: 3, len: 5, size: 5 })
        ));
    }

    #[test]
    fn truncated_tail_is_overwritten() {
        let dir = tempdir().unwrap();
        let mut journal = FileBackend::open(&dir.path().join("journal.log")).unwrap();
        journal.append(b"good-torn").unwrap();

        journal.truncate(4).unwrap();
        assert_eq!(journal.size().unwrap(), 4);
        assert_eq!(journal.durable_size().unwrap(), 4);

        assert_eq!(journal.append(b"!").unwrap(), 4);
        assert_eq!(journal.read_all().unwrap(), b"good!");
        assert!(matches!(
            journal.truncate(10),
            Err(StorageError::TruncateGrows { requested: 10, size: 5 })
        ));
    }

    #[test]
    fn open_failure_names_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("journal.log");

        let err = FileBackend::open(&path).unwrap_err();
        assert!(err.to_string().contains("journal.log"));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }
}
