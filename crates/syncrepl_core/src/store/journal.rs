//! Append-only journal of committed batches.
//!
//! Every record is framed as
//!
//! ```text
//! magic (4) | version (2) | type (1) | length (4) | CBOR payload | crc32 (4)
//! ```
//!
//! and a commit is written as `Begin, ops…, Commit { sequence }` in a single
//! append. A batch with no `Commit` at the end of the file is a torn tail
//! left by a crash; recovery drops it. Damage anywhere else is a schema
//! error, including a record that runs past the end of the file while an
//! intact record still follows it.

use crate::codec::{compute_crc32, from_cbor, to_cbor};
use crate::error::{DbError, DbResult};
use crate::types::{Cookie, SequenceNumber};
use crate::url::UrlDescriptor;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use syncrepl_storage::StorageBackend;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SRJL";

/// Current journal record layout version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// A journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Starts a batch.
    Begin,
    /// Inserts or replaces an entry.
    Put {
        /// Store key (DN normalized by policy).
        key: String,
        /// Entry payload in the runtime codec.
        entry: Bytes,
    },
    /// Removes an entry.
    Delete {
        /// Store key.
        key: String,
    },
    /// Records a new cookie.
    SetCookie {
        /// The cookie.
        cookie: Cookie,
    },
    /// Forgets the cookie.
    ClearCookie,
    /// Records the search descriptor.
    SetDescriptor {
        /// The descriptor.
        descriptor: UrlDescriptor,
    },
    /// Forgets the search descriptor.
    ClearDescriptor,
    /// Marks every entry absent.
    ResetPresence,
    /// Marks one entry present.
    MarkPresent {
        /// Store key.
        key: String,
    },
    /// Removes every entry.
    ClearEntries,
    /// Ends a batch.
    Commit {
        /// Sequence number assigned to the batch.
        sequence: SequenceNumber,
    },
}

impl JournalRecord {
    /// Type byte written in the record header.
    #[must_use]
    pub const fn type_byte(&self) -> u8 {
        match self {
            Self::Begin => 1,
            Self::Put { .. } => 2,
            Self::Delete { .. } => 3,
            Self::SetCookie { .. } => 4,
            Self::ClearCookie => 5,
            Self::SetDescriptor { .. } => 6,
            Self::ClearDescriptor => 7,
            Self::ResetPresence => 8,
            Self::MarkPresent { .. } => 9,
            Self::ClearEntries => 10,
            Self::Commit { .. } => 11,
        }
    }

    /// Appends the framed record to `buf`.
    fn encode_into(&self, buf: &mut Vec<u8>) -> DbResult<()> {
        let payload = to_cbor(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| DbError::invalid_operation("journal record payload too large"))?;

        let start = buf.len();
        buf.extend_from_slice(&JOURNAL_MAGIC);
        buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        buf.push(self.type_byte());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf[start..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }
}

/// A committed batch read back from the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Sequence from the `Commit` record.
    pub sequence: SequenceNumber,
    /// Records between `Begin` and `Commit`.
    pub ops: Vec<JournalRecord>,
}

/// Result of reading the whole journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalScan {
    /// Complete batches in order.
    pub batches: Vec<Batch>,
    /// Length of the prefix holding complete batches.
    pub valid_len: u64,
    /// Bytes after `valid_len` belonging to a torn batch.
    pub torn_bytes: u64,
}

/// The journal of one store.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl Journal {
    /// Creates a journal over a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> DbResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Appends one batch as a single write.
    ///
    /// Returns the number of bytes written. On error the journal may hold a
    /// partial batch; the caller must truncate back or stop writing.
    pub fn append_batch(
        &mut self,
        ops: &[JournalRecord],
        sequence: SequenceNumber,
    ) -> DbResult<u64> {
        let mut data = Vec::new();
        JournalRecord::Begin.encode_into(&mut data)?;
        for op in ops {
            op.encode_into(&mut data)?;
        }
        JournalRecord::Commit { sequence }.encode_into(&mut data)?;

        self.backend.append(&data)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(data.len() as u64)
    }

    /// Reads every complete batch.
    ///
    /// # Errors
    ///
    /// `Schema` for damage that cannot be a torn tail: bad magic, a checksum
    /// failure before the last record, a record length that overruns the
    /// file ahead of an intact record, records outside a batch, or a newer
    /// record layout.
    pub fn scan(&self) -> DbResult<JournalScan> {
        let data = self.backend.read_all()?;
        let size = data.len() as u64;

        let mut scan = JournalScan::default();
        let mut cursor = 0usize;
        let mut open: Option<(usize, Vec<JournalRecord>)> = None;

        while cursor < data.len() {
            let Some(record_len) = complete_record_len(&data[cursor..])? else {
                if let Some(next) = intact_record_after(&data, cursor) {
                    return Err(DbError::schema(format!(
                        "journal record at {cursor} overruns intact record at {next}"
                    )));
                }
                break;
            };
            let end = cursor + record_len;
            let record = &data[cursor..end];

            let body_end = record_len - CRC_SIZE;
            let stored = u32::from_le_bytes([
                record[body_end],
                record[body_end + 1],
                record[body_end + 2],
                record[body_end + 3],
            ]);
            if stored != compute_crc32(&record[..body_end]) {
                if end == data.len() {
                    // Last record in the file: a torn write.
                    break;
                }
                return Err(DbError::schema(format!(
                    "journal checksum mismatch at offset {cursor}"
                )));
            }

            let decoded: JournalRecord =
                from_cbor(&record[HEADER_SIZE..body_end], "journal record")?;
            if decoded.type_byte() != record[6] {
                return Err(DbError::schema(format!(
                    "journal record type {} does not match payload at offset {cursor}",
                    record[6]
                )));
            }

            match decoded {
                JournalRecord::Begin => {
                    if open.is_some() {
                        return Err(DbError::schema(format!(
                            "nested batch at offset {cursor}"
                        )));
                    }
                    open = Some((cursor, Vec::new()));
                }
                JournalRecord::Commit { sequence } => {
                    let Some((_, ops)) = open.take() else {
                        return Err(DbError::schema(format!(
                            "commit outside a batch at offset {cursor}"
                        )));
                    };
                    scan.batches.push(Batch { sequence, ops });
                    scan.valid_len = end as u64;
                }
                op => match open.as_mut() {
                    Some((_, ops)) => ops.push(op),
                    None => {
                        return Err(DbError::schema(format!(
                            "record outside a batch at offset {cursor}"
                        )));
                    }
                },
            }

            cursor = end;
        }

        scan.torn_bytes = size - scan.valid_len;
        Ok(scan)
    }

    /// Truncates the journal to `len` bytes and syncs.
    pub fn truncate(&mut self, len: u64) -> DbResult<()> {
        self.backend.truncate(len)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Empties the journal after a checkpoint.
    pub fn clear(&mut self) -> DbResult<()> {
        self.truncate(0)
    }

    /// Flushes buffered writes.
    pub fn flush(&mut self) -> DbResult<()> {
        self.backend.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("size", &self.backend.size().ok())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish()
    }
}

/// Returns the full length of the record at the start of `data`, or `None`
/// if the file ends before the record does.
fn complete_record_len(data: &[u8]) -> DbResult<Option<usize>> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }
    if data[0..4] != JOURNAL_MAGIC {
        return Err(DbError::schema("invalid journal record magic"));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > JOURNAL_VERSION {
        return Err(DbError::SchemaVersion {
            section: "journal",
            found: version,
            supported: JOURNAL_VERSION,
        });
    }

    let payload_len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if data.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

/// Returns true if `data` starts with a whole record whose checksum holds.
fn intact_record_at(data: &[u8]) -> bool {
    let Ok(Some(total)) = complete_record_len(data) else {
        return false;
    };
    let body_end = total - CRC_SIZE;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    stored == compute_crc32(&data[..body_end])
}

/// Finds the first intact record starting after `from`.
fn intact_record_after(data: &[u8], from: usize) -> Option<usize> {
    (from + 1..data.len())
        .filter(|&pos| data[pos..].starts_with(&JOURNAL_MAGIC))
        .find(|&pos| intact_record_at(&data[pos..]))
}
