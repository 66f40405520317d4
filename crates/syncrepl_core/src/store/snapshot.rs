//! Checkpointed full state.

use crate::codec::{frame, from_cbor, to_cbor, unframe, EntryCodec};
use crate::error::DbResult;
use crate::types::{Cookie, Entry, SequenceNumber};
use crate::url::UrlDescriptor;
use crate::version::Version;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Magic bytes for snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"SRSN";

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// A non-fatal inconsistency found and repaired while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    /// Which part of the store was inconsistent.
    pub source: &'static str,
    /// What was found and how it was repaired.
    pub message: String,
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    sequence: SequenceNumber,
    runtime_version: Version,
    descriptor: Option<UrlDescriptor>,
    cookie: Option<Cookie>,
    entries: BTreeMap<String, Bytes>,
    dn_index: Vec<String>,
    entry_count: u64,
}

/// Decoded snapshot contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Last sequence included.
    pub sequence: SequenceNumber,
    /// Search descriptor at checkpoint time.
    pub descriptor: Option<UrlDescriptor>,
    /// Cookie at checkpoint time.
    pub cookie: Option<Cookie>,
    /// Entries by store key.
    pub entries: BTreeMap<String, Entry>,
}

impl Snapshot {
    /// Encodes the snapshot with the running entry codec.
    pub(crate) fn encode(&self, runtime_version: &Version) -> DbResult<Vec<u8>> {
        let mut entries = BTreeMap::new();
        for (key, entry) in &self.entries {
            entries.insert(key.clone(), Bytes::from(EntryCodec::encode(entry)?));
        }

        let body = SnapshotBody {
            sequence: self.sequence,
            runtime_version: runtime_version.clone(),
            descriptor: self.descriptor.clone(),
            cookie: self.cookie.clone(),
            dn_index: self.entries.keys().cloned().collect(),
            entry_count: self.entries.len() as u64,
            entries,
        };
        frame(SNAPSHOT_MAGIC, SNAPSHOT_VERSION, &to_cbor(&body)?)
    }

    /// Returns the runtime version recorded in an encoded snapshot.
    pub(crate) fn runtime_version(data: &[u8]) -> DbResult<Version> {
        let (_, body) = unframe(data, SNAPSHOT_MAGIC, SNAPSHOT_VERSION, "snapshot")?;
        let body: SnapshotBody = from_cbor(body, "snapshot")?;
        Ok(body.runtime_version)
    }

    /// Decodes a snapshot.
    ///
    /// The DN index and entry count are cross-checked against the entry map.
    /// The entry map wins; mismatches come back as warnings.
    pub(crate) fn decode(
        data: &[u8],
        codec: &EntryCodec,
    ) -> DbResult<(Self, Vec<ConsistencyWarning>)> {
        let (_, body) = unframe(data, SNAPSHOT_MAGIC, SNAPSHOT_VERSION, "snapshot")?;
        let body: SnapshotBody = from_cbor(body, "snapshot")?;

        let mut warnings = Vec::new();

        if body.entry_count != body.entries.len() as u64 {
            warnings.push(ConsistencyWarning {
                source: "snapshot",
                message: format!(
                    "entry count recorded as {} but {} entries are stored; count rebuilt",
                    body.entry_count,
                    body.entries.len()
                ),
            });
        }

        let indexed: BTreeSet<&String> = body.dn_index.iter().collect();
        let stored: BTreeSet<&String> = body.entries.keys().collect();
        if indexed != stored {
            let missing = stored.difference(&indexed).count();
            let extra = indexed.difference(&stored).count();
            warnings.push(ConsistencyWarning {
                source: "snapshot",
                message: format!(
                    "DN index lists {extra} unknown and misses {missing} stored entries; \
                     index rebuilt"
                ),
            });
        }

        let mut entries = BTreeMap::new();
        for (key, raw) in body.entries {
            entries.insert(key, codec.decode(&raw)?);
        }

        Ok((
            Self {
                sequence: body.sequence,
                descriptor: body.descriptor,
                cookie: body.cookie,
                entries,
            },
            warnings,
        ))
    }
}
