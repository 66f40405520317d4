//! In-memory journal backend.

use crate::backend::StorageBackend;
use crate::error::{check_range, StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Disk {
    bytes: Vec<u8>,
    synced_len: u64,
    syncs: u64,
}

/// A journal kept in memory.
///
/// Clones share one simulated disk. Hand one clone to a store, drop the
/// store, and reopen from another clone to simulate a process restart over
/// the same journal. The disk also tracks how much was synced, so a test
/// can ask what a power loss would have left.
///
/// # Example
///
/// ```rust
/// use syncrepl_storage::{StorageBackend, InMemoryBackend};
///
/// let mut journal = InMemoryBackend::new();
/// let disk = journal.clone();
/// journal.append(b"batch").unwrap();
/// assert_eq!(disk.size().unwrap(), 5);
/// assert!(disk.durable_data().is_empty());
///
/// journal.sync().unwrap();
/// assert_eq!(disk.durable_data(), b"batch");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    disk: Arc<RwLock<Disk>>,
}

impl InMemoryBackend {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal holding `bytes`, all of them durable.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        let synced_len = bytes.len() as u64;
        Self {
            disk: Arc::new(RwLock::new(Disk {
                bytes,
                synced_len,
                syncs: 0,
            })),
        }
    }

    /// Returns a copy of every stored byte.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.disk.read().bytes.clone()
    }

    /// Returns the bytes that would survive a power loss.
    #[must_use]
    pub fn durable_data(&self) -> Vec<u8> {
        let disk = self.disk.read();
        disk.bytes[..disk.synced_len as usize].to_vec()
    }

    /// Returns how many times the journal was synced.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.disk.read().syncs
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let disk = self.disk.read();
        check_range(offset, len, disk.bytes.len() as u64)?;
        let start = offset as usize;
        Ok(disk.bytes[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut disk = self.disk.write();
        let offset = disk.bytes.len() as u64;
        disk.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.disk.read().bytes.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut disk = self.disk.write();
        disk.synced_len = disk.bytes.len() as u64;
        disk.syncs += 1;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut disk = self.disk.write();
        let size = disk.bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateGrows {
                requested: new_size,
                size,
            });
        }
        disk.bytes.truncate(new_size as usize);
        disk.synced_len = new_size;
        Ok(())
    }

    fn durable_size(&self) -> StorageResult<u64> {
        Ok(self.disk.read().synced_len)
    }
}
