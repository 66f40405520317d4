//! The persistent mirror store.
//!
//! A [`Store`] holds the mirrored entries plus session metadata (cookie and
//! search descriptor). State lives in memory and is made durable by an
//! append-only journal, periodically folded into a snapshot:
//!
//! - every change goes through a [`Transaction`] and is committed as one
//!   journal batch; memory changes only after the write succeeds
//! - a crash mid-commit leaves a torn batch that the next open discards
//! - the version guard runs before any entry is read

mod dir;
mod journal;
mod snapshot;
mod transaction;

pub use dir::StoreDir;
pub use journal::{Batch, Journal, JournalRecord, JournalScan, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use snapshot::{ConsistencyWarning, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
use snapshot::Snapshot;
pub use transaction::{PendingOp, Transaction, TransactionState};

use crate::codec::EntryCodec;
use crate::config::StoreConfig;
use crate::error::{DbError, DbResult};
use crate::manifest::Manifest;
use crate::types::{Cookie, DnPolicy, Entry, SequenceNumber};
use crate::url::UrlDescriptor;
use crate::version::{Compatibility, Component, VersionInfo};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syncrepl_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened while opening a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReport {
    /// Id recorded in the manifest.
    pub store_id: Uuid,
    /// True if the store was created by this open.
    pub created: bool,
    /// Result of the version guard.
    pub compatibility: Compatibility,
    /// Sequence of the loaded snapshot, if any.
    pub snapshot_sequence: Option<SequenceNumber>,
    /// Journal batches applied on top of the snapshot.
    pub replayed_batches: usize,
    /// Journal batches already contained in the snapshot.
    pub skipped_batches: usize,
    /// Bytes of torn journal tail discarded.
    pub torn_bytes: u64,
    /// Inconsistencies found and repaired.
    pub warnings: Vec<ConsistencyWarning>,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: BTreeMap<String, Entry>,
    cookie: Option<Cookie>,
    descriptor: Option<UrlDescriptor>,
    sequence: SequenceNumber,
}

impl StoreState {
    /// Applies a committed transaction operation.
    fn apply(&mut self, op: &PendingOp, policy: DnPolicy) {
        match op {
            PendingOp::Put(entry) => {
                self.entries.insert(policy.key(&entry.dn), entry.clone());
            }
            PendingOp::Delete(dn) => {
                self.entries.remove(&policy.key(dn));
            }
            PendingOp::SetCookie(cookie) => self.cookie = Some(cookie.clone()),
            PendingOp::ClearCookie => self.cookie = None,
            PendingOp::SetDescriptor(descriptor) => self.descriptor = Some(descriptor.clone()),
            PendingOp::ClearDescriptor => self.descriptor = None,
            PendingOp::ResetPresence => self.reset_presence(),
            PendingOp::MarkPresent(dn) => self.mark_present(&policy.key(dn)),
            PendingOp::ClearEntries => self.entries.clear(),
        }
    }

    /// Applies a record read back from the journal.
    fn replay(&mut self, record: &JournalRecord, codec: &EntryCodec) -> DbResult<()> {
        match record {
            JournalRecord::Put { key, entry } => {
                self.entries.insert(key.clone(), codec.decode(entry)?);
            }
            JournalRecord::Delete { key } => {
                self.entries.remove(key);
            }
            JournalRecord::SetCookie { cookie } => self.cookie = Some(cookie.clone()),
            JournalRecord::ClearCookie => self.cookie = None,
            JournalRecord::SetDescriptor { descriptor } => {
                self.descriptor = Some(descriptor.clone());
            }
            JournalRecord::ClearDescriptor => self.descriptor = None,
            JournalRecord::ResetPresence => self.reset_presence(),
            JournalRecord::MarkPresent { key } => self.mark_present(key),
            JournalRecord::ClearEntries => self.entries.clear(),
            JournalRecord::Begin | JournalRecord::Commit { .. } => {
                return Err(DbError::schema("batch marker inside a batch"));
            }
        }
        Ok(())
    }

    fn reset_presence(&mut self) {
        for entry in self.entries.values_mut() {
            entry.present = false;
        }
    }

    fn mark_present(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.present = true;
        }
    }
}

/// A finite, restartable iterator over the DNs of a store.
///
/// Captures the DN list when created, so later commits do not affect it.
#[derive(Debug, Clone)]
pub struct AllDns {
    dns: Arc<[String]>,
    position: usize,
}

impl AllDns {
    fn new(dns: Vec<String>) -> Self {
        Self {
            dns: Arc::from(dns),
            position: 0,
        }
    }

    /// Rewinds to the first DN.
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for AllDns {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let dn = self.dns.get(self.position)?.clone();
        self.position += 1;
        Some(dn)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dns.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for AllDns {}

/// The mirror store handle.
///
/// # Opening a Store
///
/// ```rust,no_run
/// use syncrepl_core::{Entry, Store};
/// use std::path::Path;
///
/// let store = Store::open(Path::new("mirror"))?;
///
/// store.transaction(|txn| {
///     txn.put(Entry::new("cn=alice,dc=example,dc=com").with_text("cn", &["alice"]))
/// })?;
///
/// store.close()?;
/// # Ok::<(), syncrepl_core::DbError>(())
/// ```
///
/// Commits are serialized internally; a `Store` can be shared between
/// threads without extra locking.
pub struct Store {
    config: StoreConfig,
    /// None for stores opened over a bare backend.
    dir: Option<StoreDir>,
    manifest: RwLock<Manifest>,
    /// Also the commit lock.
    journal: Mutex<Journal>,
    state: RwLock<StoreState>,
    report: OpenReport,
    is_open: RwLock<bool>,
    poisoned: AtomicBool,
}

impl Store {
    /// Opens or creates a store with default configuration.
    ///
    /// # Errors
    ///
    /// `Locked` if another process holds the directory, `Version` if the
    /// stored versions are unusable, and the `Schema` family for a damaged
    /// container.
    pub fn open(path: &Path) -> DbResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens or creates a store.
    ///
    /// # Errors
    ///
    /// See [`Store::open`]. Also `Setting` if `config.dn_policy` differs
    /// from the policy recorded at creation.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> DbResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;

        let (manifest, created) = match dir.load_manifest()? {
            Some(manifest) => (manifest, false),
            None if dir.is_new_store() => {
                if !config.create_if_missing {
                    return Err(DbError::invalid_operation(
                        "store does not exist and create_if_missing is false",
                    ));
                }
                let manifest = Self::new_manifest(&config);
                dir.save_manifest(&manifest)?;
                (manifest, true)
            }
            None => return Err(DbError::schema("MANIFEST is missing but store files exist")),
        };

        let snapshot = dir.load_snapshot()?;
        let backend = FileBackend::open(&dir.journal_path())?;
        Self::recover(config, Some(dir), manifest, created, Box::new(backend), snapshot)
    }

    /// Opens a store over a journal backend with no directory.
    ///
    /// There is no lock, manifest file or snapshot; checkpoints are skipped.
    /// Reopening over the same bytes replays the journal.
    pub fn open_with_backend(
        config: StoreConfig,
        backend: Box<dyn StorageBackend>,
    ) -> DbResult<Self> {
        let created = backend.size()? == 0;
        let manifest = Self::new_manifest(&config);
        Self::recover(config, None, manifest, created, backend, None)
    }

    /// Opens a fresh in-memory store. Data is lost when it is dropped.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open_with_backend(StoreConfig::default(), Box::new(InMemoryBackend::new()))
    }

    fn new_manifest(config: &StoreConfig) -> Manifest {
        Manifest::new(
            config.guard.format().version.clone(),
            config.guard.runtime().version.clone(),
            config.dn_policy.unwrap_or_default(),
        )
    }

    fn recover(
        config: StoreConfig,
        dir: Option<StoreDir>,
        manifest: Manifest,
        created: bool,
        backend: Box<dyn StorageBackend>,
        snapshot_data: Option<Vec<u8>>,
    ) -> DbResult<Self> {
        // Versions first: nothing below may read an entry we cannot decode.
        let compatibility = config
            .guard
            .validate(&manifest.format_info(), &manifest.runtime_info())?;

        if let Some(requested) = config.dn_policy {
            if requested != manifest.dn_policy {
                return Err(DbError::Setting {
                    name: "dn_policy".to_string(),
                    stored: manifest.dn_policy.to_string(),
                    requested: requested.to_string(),
                });
            }
        }

        let journal_codec = EntryCodec::for_stored(&config.guard, &manifest.runtime_info())?;
        let mut migrated = journal_codec.migrates();

        let mut state = StoreState::default();
        let mut warnings = Vec::new();
        let mut snapshot_sequence = None;

        if let Some(data) = snapshot_data {
            let runtime =
                VersionInfo::new(Component::HostRuntime, Snapshot::runtime_version(&data)?);
            let codec = EntryCodec::for_stored(&config.guard, &runtime)?;
            migrated |= codec.migrates();

            let (snapshot, found) = Snapshot::decode(&data, &codec)?;
            for warning in &found {
                warn!(store_id = %manifest.store_id, %warning, "repaired inconsistent snapshot");
            }
            warnings.extend(found);

            snapshot_sequence = Some(snapshot.sequence);
            state = StoreState {
                entries: snapshot.entries,
                cookie: snapshot.cookie,
                descriptor: snapshot.descriptor,
                sequence: snapshot.sequence,
            };
        }

        let mut journal = Journal::new(backend, config.sync_on_commit);
        let scan = journal.scan()?;
        if scan.torn_bytes > 0 {
            warn!(
                store_id = %manifest.store_id,
                torn_bytes = scan.torn_bytes,
                valid_len = scan.valid_len,
                "discarding torn journal tail"
            );
            journal.truncate(scan.valid_len)?;
        }

        let mut replayed_batches = 0;
        let mut skipped_batches = 0;
        for batch in &scan.batches {
            if batch.sequence <= state.sequence {
                skipped_batches += 1;
                continue;
            }
            for record in &batch.ops {
                state.replay(record, &journal_codec)?;
            }
            state.sequence = batch.sequence;
            replayed_batches += 1;
        }

        if state.cookie.is_some() && state.descriptor.is_none() {
            return Err(DbError::schema("cookie stored without a search descriptor"));
        }

        info!(
            store_id = %manifest.store_id,
            created,
            entries = state.entries.len(),
            sequence = %state.sequence,
            replayed_batches,
            "opened mirror store"
        );

        let report = OpenReport {
            store_id: manifest.store_id,
            created,
            compatibility,
            snapshot_sequence,
            replayed_batches,
            skipped_batches,
            torn_bytes: scan.torn_bytes,
            warnings,
        };

        let store = Self {
            config,
            dir,
            manifest: RwLock::new(manifest),
            journal: Mutex::new(journal),
            state: RwLock::new(state),
            report,
            is_open: RwLock::new(true),
            poisoned: AtomicBool::new(false),
        };

        if migrated {
            let to = store.config.guard.runtime().version.clone();
            info!(store_id = %store.store_id(), runtime = %to, "migrated entry payloads");
            store.manifest.write().runtime_version = to;
            store.checkpoint()?;
        }

        Ok(store)
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> DbResult<Transaction> {
        self.ensure_open()?;
        Ok(Transaction::new())
    }

    /// Aborts a transaction, discarding its operations.
    pub fn abort(&self, txn: &mut Transaction) -> DbResult<()> {
        if !txn.is_active() {
            return Err(DbError::invalid_operation("transaction not active"));
        }
        txn.mark_aborted();
        Ok(())
    }

    /// Commits a transaction as one durable unit.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the transaction is not active or would leave a
    /// cookie without a descriptor. A journal write failure is returned and
    /// poisons the store: every later commit fails with `Poisoned`.
    pub fn commit(&self, txn: &mut Transaction) -> DbResult<SequenceNumber> {
        self.ensure_writable()?;
        if !txn.is_active() {
            return Err(DbError::invalid_operation("transaction not active"));
        }

        let mut journal = self.journal.lock();
        self.ensure_writable()?;

        if txn.is_empty() {
            txn.mark_committed();
            return Ok(self.state.read().sequence);
        }

        let policy = self.dn_policy();
        let sequence = {
            let state = self.state.read();
            let mut has_cookie = state.cookie.is_some();
            let mut has_descriptor = state.descriptor.is_some();
            for op in txn.ops() {
                match op {
                    PendingOp::SetCookie(_) => has_cookie = true,
                    PendingOp::ClearCookie => has_cookie = false,
                    PendingOp::SetDescriptor(_) => has_descriptor = true,
                    PendingOp::ClearDescriptor => has_descriptor = false,
                    _ => {}
                }
            }
            if has_cookie && !has_descriptor {
                return Err(DbError::invalid_operation(
                    "a cookie cannot be stored without a search descriptor",
                ));
            }
            state.sequence.next()
        };

        let records = txn
            .ops()
            .iter()
            .map(|op| Self::to_record(op, policy))
            .collect::<DbResult<Vec<_>>>()?;

        if let Err(e) = journal.append_batch(&records, sequence) {
            self.poisoned.store(true, Ordering::SeqCst);
            warn!(store_id = %self.store_id(), error = %e, "journal write failed; store poisoned");
            return Err(e);
        }

        {
            let mut state = self.state.write();
            for op in txn.ops() {
                state.apply(op, policy);
            }
            state.sequence = sequence;
        }
        txn.mark_committed();
        debug!(%sequence, ops = records.len(), "committed batch");

        // The batch is durable from here on; nothing below may fail the commit.
        let threshold = self.config.checkpoint_threshold;
        if threshold > 0 {
            match journal.size() {
                Ok(size) if size >= threshold => {
                    if let Err(e) = self.checkpoint_locked(&mut journal) {
                        warn!(error = %e, "automatic checkpoint failed");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "journal size unavailable; automatic checkpoint skipped");
                }
            }
        }

        Ok(sequence)
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is aborted.
    pub fn transaction<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Transaction) -> DbResult<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                txn.mark_aborted();
                Err(e)
            }
        }
    }

    fn to_record(op: &PendingOp, policy: DnPolicy) -> DbResult<JournalRecord> {
        Ok(match op {
            PendingOp::Put(entry) => JournalRecord::Put {
                key: policy.key(&entry.dn),
                entry: Bytes::from(EntryCodec::encode(entry)?),
            },
            PendingOp::Delete(dn) => JournalRecord::Delete {
                key: policy.key(dn),
            },
            PendingOp::SetCookie(cookie) => JournalRecord::SetCookie {
                cookie: cookie.clone(),
            },
            PendingOp::ClearCookie => JournalRecord::ClearCookie,
            PendingOp::SetDescriptor(descriptor) => JournalRecord::SetDescriptor {
                descriptor: descriptor.clone(),
            },
            PendingOp::ClearDescriptor => JournalRecord::ClearDescriptor,
            PendingOp::ResetPresence => JournalRecord::ResetPresence,
            PendingOp::MarkPresent(dn) => JournalRecord::MarkPresent {
                key: policy.key(dn),
            },
            PendingOp::ClearEntries => JournalRecord::ClearEntries,
        })
    }

    /// Gets an entry by DN.
    pub fn get(&self, dn: &str) -> DbResult<Option<Entry>> {
        self.ensure_open()?;
        let key = self.dn_policy().key(dn);
        Ok(self.state.read().entries.get(&key).cloned())
    }

    /// Gets an entry as it would be after `txn` commits.
    pub fn get_in_txn(&self, txn: &Transaction, dn: &str) -> DbResult<Option<Entry>> {
        self.ensure_open()?;
        let policy = self.dn_policy();
        let key = policy.key(dn);
        let state = self.state.read();
        Ok(txn.resolve_entry(policy, &key, state.entries.get(&key)))
    }

    /// Returns every DN, as delivered by the server, in key order.
    pub fn all_dns(&self) -> DbResult<AllDns> {
        self.ensure_open()?;
        let dns = self.state.read().entries.values().map(|e| e.dn.clone()).collect();
        Ok(AllDns::new(dns))
    }

    /// Returns the DNs of entries currently marked absent.
    pub fn absent_dns(&self) -> DbResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .entries
            .values()
            .filter(|e| !e.present)
            .map(|e| e.dn.clone())
            .collect())
    }

    /// Returns the DNs that would be marked absent after `txn` commits.
    pub fn absent_dns_in(&self, txn: &Transaction) -> DbResult<Vec<String>> {
        self.ensure_open()?;
        let policy = self.dn_policy();
        let state = self.state.read();

        let mut keys: BTreeSet<String> = state.entries.keys().cloned().collect();
        keys.extend(txn.touched_keys(policy));

        Ok(keys
            .iter()
            .filter_map(|key| txn.resolve_entry(policy, key, state.entries.get(key)))
            .filter(|e| !e.present)
            .map(|e| e.dn)
            .collect())
    }

    /// Returns the stored cookie.
    pub fn cookie(&self) -> DbResult<Option<Cookie>> {
        self.ensure_open()?;
        Ok(self.state.read().cookie.clone())
    }

    /// Returns the stored search descriptor.
    pub fn descriptor(&self) -> DbResult<Option<UrlDescriptor>> {
        self.ensure_open()?;
        Ok(self.state.read().descriptor.clone())
    }

    /// Returns the number of entries.
    pub fn entry_count(&self) -> DbResult<usize> {
        self.ensure_open()?;
        Ok(self.state.read().entries.len())
    }

    /// Returns the last committed sequence number.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.state.read().sequence
    }

    /// Returns the store id.
    #[must_use]
    pub fn store_id(&self) -> Uuid {
        self.manifest.read().store_id
    }

    /// Returns the DN policy fixed at creation.
    #[must_use]
    pub fn dn_policy(&self) -> DnPolicy {
        self.manifest.read().dn_policy
    }

    /// Returns a copy of the manifest.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        self.manifest.read().clone()
    }

    /// Returns what happened while opening.
    #[must_use]
    pub fn open_report(&self) -> &OpenReport {
        &self.report
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> DbResult<u64> {
        self.journal.lock().size()
    }

    /// Returns the store directory, if the store has one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Writes the full state to the snapshot and empties the journal.
    ///
    /// Does nothing for stores without a directory.
    pub fn checkpoint(&self) -> DbResult<()> {
        self.ensure_writable()?;
        let mut journal = self.journal.lock();
        self.checkpoint_locked(&mut journal)
    }

    fn checkpoint_locked(&self, journal: &mut Journal) -> DbResult<()> {
        let Some(dir) = &self.dir else {
            debug!("store has no directory; checkpoint skipped");
            return Ok(());
        };

        let snapshot = {
            let state = self.state.read();
            Snapshot {
                sequence: state.sequence,
                descriptor: state.descriptor.clone(),
                cookie: state.cookie.clone(),
                entries: state.entries.clone(),
            }
        };
        let runtime = self.config.guard.runtime().version.clone();
        dir.save_snapshot(&snapshot.encode(&runtime)?)?;

        {
            let mut manifest = self.manifest.write();
            manifest.last_checkpoint = Some(snapshot.sequence);
            manifest.runtime_version = runtime;
            dir.save_manifest(&manifest)?;
        }

        // Batches left behind by a crash here are skipped on replay.
        journal.clear()?;

        info!(
            store_id = %self.store_id(),
            sequence = %snapshot.sequence,
            entries = snapshot.entries.len(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Discards every entry, the cookie and the descriptor.
    ///
    /// Used after a search-definition conflict when the caller decides to
    /// rebuild the mirror. Never called automatically.
    pub fn reset(&self) -> DbResult<SequenceNumber> {
        let mut txn = self.begin()?;
        txn.clear_entries()?;
        txn.clear_cookie()?;
        txn.clear_descriptor()?;
        let sequence = self.commit(&mut txn)?;

        info!(store_id = %self.store_id(), %sequence, "mirror reset");
        self.checkpoint()?;
        Ok(sequence)
    }

    /// Closes the store: flushes the journal, saves the manifest and
    /// releases the directory lock. Every later call fails with `Closed`.
    pub fn close(&self) -> DbResult<()> {
        {
            let mut is_open = self.is_open.write();
            if !*is_open {
                return Ok(());
            }
            *is_open = false;
        }

        let result = self.flush_for_close();
        if let Some(dir) = &self.dir {
            dir.release_lock();
        }
        debug!(store_id = %self.store_id(), "closed mirror store");
        result
    }

    fn flush_for_close(&self) -> DbResult<()> {
        if self.is_poisoned() {
            return Ok(());
        }
        self.journal.lock().flush()?;
        if let Some(dir) = &self.dir {
            dir.save_manifest(&self.manifest.read())?;
        }
        Ok(())
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Checks if a failed journal write has poisoned the store.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> DbResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(DbError::Closed)
        }
    }

    fn ensure_writable(&self) -> DbResult<()> {
        self.ensure_open()?;
        if self.is_poisoned() {
            return Err(DbError::Poisoned);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("store_id", &self.store_id())
            .field("path", &self.path())
            .field("sequence", &self.sequence())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
