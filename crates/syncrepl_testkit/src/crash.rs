//! Crash recovery testing for the mirror store.
//!
//! [`CrashableBackend`] wraps a journal backend and fails once a chosen
//! number of bytes has been written, keeping the bytes before that point.
//! That is what a process killed mid-write leaves on disk.
//!
//! [`crash_every_offset`] runs one commit once per byte of its journal
//! record, crashing at that byte, and reopens the store each time.
//!
//! ## Usage
//!
//! ```rust
//! use syncrepl_testkit::prelude::*;
//!
//! let cases = crash_every_offset(
//!     |store| store.transaction(|txn| txn.set_descriptor(sample_descriptor())),
//!     |txn| txn.put(sample_entry("alice")),
//! )
//! .unwrap();
//!
//! for case in &cases {
//!     assert_eq!(case.recovered, case.before);
//! }
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use syncrepl_core::{DbResult, Store, StoreConfig, Transaction};
use syncrepl_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

use crate::fixtures::StoreImage;

/// Shared switchboard for a [`CrashableBackend`].
///
/// The backend is boxed into the store, so tests keep this handle to arm
/// the crash afterwards.
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl Default for CrashControl {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }
}

impl CrashControl {
    /// Crashes once the total bytes written reaches `bytes`.
    pub fn crash_after(&self, bytes: u64) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Crashes `bytes` into the next write.
    pub fn crash_after_next(&self, bytes: u64) {
        self.crash_after(self.bytes_written() + bytes);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("simulated crash during {what}"),
    ))
}

/// A storage backend wrapper that can simulate crashes.
///
/// After the crash every operation that touches the bytes fails, as the
/// process would be gone.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            control: Arc::new(CrashControl::default()),
        }
    }

    /// Returns the handle that arms and inspects the crash.
    pub fn control(&self) -> Arc<CrashControl> {
        Arc::clone(&self.control)
    }

    fn ensure_alive(&self, what: &str) -> StorageResult<()> {
        if self.control.has_crashed() {
            Err(simulated(what))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.ensure_alive("write")?;

        let current = self.control.bytes_written();
        let threshold = self.control.crash_after_bytes.load(Ordering::SeqCst);
        let len = bytes.len() as u64;

        if current + len > threshold {
            self.control.crashed.store(true, Ordering::SeqCst);
            let partial = threshold.saturating_sub(current) as usize;
            if partial > 0 {
                let _ = self.inner.append(&bytes[..partial]);
                self.control.bytes_written.fetch_add(partial as u64, Ordering::SeqCst);
            }
            return Err(simulated("partial write"));
        }

        let offset = self.inner.append(bytes)?;
        self.control.bytes_written.fetch_add(len, Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_alive("flush")?;
        if self.control.fail_on_sync.load(Ordering::SeqCst) {
            self.control.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_alive("sync")?;
        if self.control.fail_on_sync.load(Ordering::SeqCst) {
            self.control.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_alive("truncate")?;
        self.inner.truncate(new_size)
    }

    fn durable_size(&self) -> StorageResult<u64> {
        self.inner.durable_size()
    }
}

/// One crash point of [`crash_every_offset`].
#[derive(Debug, Clone)]
pub struct CrashCase {
    /// Bytes of the batch that reached the journal.
    pub offset: u64,
    /// Store contents before the batch.
    pub before: StoreImage,
    /// Store contents after reopening.
    pub recovered: StoreImage,
    /// Torn bytes the reopen discarded.
    pub torn_bytes: u64,
}

/// Crashes the commit of `batch` at every byte offset of its journal record.
///
/// `setup` runs first on each fresh store and is not crashed. Each case
/// reopens the store over the surviving bytes; a correct store recovers to
/// `before` in every case.
pub fn crash_every_offset<S, B>(setup: S, batch: B) -> DbResult<Vec<CrashCase>>
where
    S: Fn(&Store) -> DbResult<()>,
    B: Fn(&mut Transaction) -> DbResult<()>,
{
    let batch_len = {
        let disk = InMemoryBackend::new();
        let store = Store::open_with_backend(config(), Box::new(disk.clone()))?;
        setup(&store)?;
        let start = disk.size()?;
        let mut txn = store.begin()?;
        batch(&mut txn)?;
        store.commit(&mut txn)?;
        disk.size()? - start
    };

    let mut cases = Vec::with_capacity(batch_len as usize);
    for offset in 0..batch_len {
        let disk = InMemoryBackend::new();
        let crashable = CrashableBackend::new(Box::new(disk.clone()));
        let control = crashable.control();

        let store = Store::open_with_backend(config(), Box::new(crashable))?;
        setup(&store)?;
        let before = StoreImage::capture(&store)?;

        control.crash_after_next(offset);
        let mut txn = store.begin()?;
        batch(&mut txn)?;
        if store.commit(&mut txn).is_ok() {
            return Err(syncrepl_core::DbError::invalid_operation(format!(
                "commit survived a crash at byte {offset}"
            )));
        }
        drop(store);

        let reopened = Store::open_with_backend(config(), Box::new(disk))?;
        cases.push(CrashCase {
            offset,
            before,
            recovered: StoreImage::capture(&reopened)?,
            torn_bytes: reopened.open_report().torn_bytes,
        });
    }
    Ok(cases)
}

fn config() -> StoreConfig {
    StoreConfig::new().checkpoint_threshold(0)
}
