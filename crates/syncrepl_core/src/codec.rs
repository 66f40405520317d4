//! CBOR helpers and the entry payload codec.

use crate::error::{DbError, DbResult};
use crate::types::Entry;
use crate::version::{check, RuntimeMigration, VersionError, VersionGuard, VersionInfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Encodes a value as CBOR.
pub(crate) fn to_cbor<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| DbError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR value. Failures are schema errors: the bytes passed a
/// checksum, so a decode failure means a missing or malformed field.
pub(crate) fn from_cbor<T: DeserializeOwned>(data: &[u8], what: &str) -> DbResult<T> {
    ciborium::from_reader(data).map_err(|e| DbError::schema(format!("malformed {what}: {e}")))
}

/// Reads and writes entry payloads for one stored runtime generation.
#[derive(Clone, Default)]
pub(crate) struct EntryCodec {
    migration: Option<Arc<dyn RuntimeMigration>>,
}

impl EntryCodec {
    /// Codec for payloads written by the running build.
    pub(crate) fn current() -> Self {
        Self::default()
    }

    /// Codec for payloads written under `stored`.
    ///
    /// Payloads one major behind go through the registered migration first.
    pub(crate) fn for_stored(guard: &VersionGuard, stored: &VersionInfo) -> DbResult<Self> {
        match check(stored, guard.runtime()) {
            Ok(()) => Ok(Self::current()),
            Err(VersionError::NoMigration { component, from, to }) => {
                match guard.migration_for(from.major()) {
                    Some(migration) => Ok(Self {
                        migration: Some(migration),
                    }),
                    None => Err(VersionError::NoMigration { component, from, to }.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns true if payloads are rewritten on decode.
    pub(crate) fn migrates(&self) -> bool {
        self.migration.is_some()
    }

    pub(crate) fn encode(entry: &Entry) -> DbResult<Vec<u8>> {
        to_cbor(entry)
    }

    pub(crate) fn decode(&self, raw: &[u8]) -> DbResult<Entry> {
        match &self.migration {
            Some(migration) => {
                let upgraded = migration.migrate_entry(raw.to_vec())?;
                from_cbor(&upgraded, "entry")
            }
            None => from_cbor(raw, "entry"),
        }
    }
}

impl std::fmt::Debug for EntryCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCodec")
            .field("migration", &self.migration.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

/// Computes CRC32 checksum for data.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, table built at compile time
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Frames a CBOR body as `magic, version, length, body, crc32`.
///
/// Used for the manifest and the snapshot; the journal adds a record type.
pub(crate) fn frame(magic: [u8; 4], version: u16, body: &[u8]) -> DbResult<Vec<u8>> {
    let len = u32::try_from(body.len())
        .map_err(|_| DbError::invalid_operation("container body too large"))?;

    let mut data = Vec::with_capacity(4 + 2 + 4 + body.len() + 4);
    data.extend_from_slice(&magic);
    data.extend_from_slice(&version.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(body);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Checks a frame written by [`frame`] and returns its version and body.
pub(crate) fn unframe<'a>(
    data: &'a [u8],
    magic: [u8; 4],
    supported: u16,
    section: &'static str,
) -> DbResult<(u16, &'a [u8])> {
    if data.len() < 10 || data[0..4] != magic {
        return Err(DbError::schema(format!("invalid {section} magic")));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > supported {
        return Err(DbError::SchemaVersion {
            section,
            found: version,
            supported,
        });
    }

    let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let end = 10 + len;
    if data.len() != end + 4 {
        return Err(DbError::schema(format!(
            "{section} length mismatch: header says {len} body bytes, file has {}",
            data.len().saturating_sub(14)
        )));
    }

    let stored = u32::from_le_bytes([data[end], data[end + 1], data[end + 2], data[end + 3]]);
    if stored != compute_crc32(&data[..end]) {
        return Err(DbError::schema(format!("{section} checksum mismatch")));
    }

    Ok((version, &data[10..end]))
}
