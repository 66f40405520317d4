//! The journal backend trait.

use crate::error::StorageResult;

/// An append-only byte store holding one mirror journal.
///
/// Backends never interpret the bytes. Framing, checksums and torn-tail
/// recovery belong to the journal in `syncrepl_core`.
///
/// A journal only ever grows by `append` and shrinks by `truncate`, either
/// to drop a torn tail found on open or to empty itself after a checkpoint.
/// Bytes appended since the last `sync` may be lost, wholly or in part, by
/// a crash.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::OutOfRange`] if the range is not fully
    /// stored, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// An I/O error. A failed append may leave a prefix of `data` behind.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands buffered bytes to the operating system.
    ///
    /// # Errors
    ///
    /// An I/O error.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the stored length, which is also the next append offset.
    ///
    /// # Errors
    ///
    /// An I/O error.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// An I/O error.
    fn sync(&mut self) -> StorageResult<()>;

    /// Shrinks the store to `new_size` bytes and makes that durable.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::TruncateGrows`] if `new_size` is larger than
    /// the stored length, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// An I/O error, or `OutOfRange` if the store does not fit in memory.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| crate::StorageError::OutOfRange {
            offset: 0,
            len: usize::MAX,
            size,
        })?;
        self.read_at(0, len)
    }

    /// Returns the length known to survive a crash.
    ///
    /// Backends that cannot tell report [`StorageBackend::size`].
    ///
    /// # Errors
    ///
    /// An I/O error.
    fn durable_size(&self) -> StorageResult<u64> {
        self.size()
    }
}
