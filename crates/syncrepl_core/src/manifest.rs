//! Store manifest.
//!
//! The manifest records what a mirror *is*: its id, the versions that wrote
//! it, the settings fixed at creation, and the last checkpoint. It is small
//! and rewritten atomically.

use crate::codec::{frame, from_cbor, to_cbor, unframe};
use crate::error::DbResult;
use crate::types::{DnPolicy, SequenceNumber};
use crate::version::{Component, Version, VersionInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"SRMF";

/// Current manifest layout version.
pub const MANIFEST_VERSION: u16 = 1;

/// Store manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Random id assigned at creation.
    pub store_id: Uuid,
    /// Engine format that wrote the store.
    pub format_version: Version,
    /// Entry codec generation of the stored payloads.
    pub runtime_version: Version,
    /// DN policy fixed at creation.
    pub dn_policy: DnPolicy,
    /// Last checkpoint sequence number.
    pub last_checkpoint: Option<SequenceNumber>,
}

impl Manifest {
    /// Creates a manifest for a new store.
    #[must_use]
    pub fn new(format_version: Version, runtime_version: Version, dn_policy: DnPolicy) -> Self {
        Self {
            store_id: Uuid::new_v4(),
            format_version,
            runtime_version,
            dn_policy,
            last_checkpoint: None,
        }
    }

    /// Stored engine format as a version record.
    #[must_use]
    pub fn format_info(&self) -> VersionInfo {
        VersionInfo::new(Component::EngineFormat, self.format_version.clone())
    }

    /// Stored host runtime as a version record.
    #[must_use]
    pub fn runtime_info(&self) -> VersionInfo {
        VersionInfo::new(Component::HostRuntime, self.runtime_version.clone())
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        frame(MANIFEST_MAGIC, MANIFEST_VERSION, &to_cbor(self)?)
    }

    /// Decodes a manifest from bytes.
    ///
    /// # Errors
    ///
    /// `SchemaVersion` if the layout is newer than this build reads,
    /// `Schema` for bad magic, checksum failure or missing fields.
    pub fn decode(data: &[u8]) -> DbResult<Self> {
        let (_, body) = unframe(data, MANIFEST_MAGIC, MANIFEST_VERSION, "manifest")?;
        from_cbor(body, "manifest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compute_crc32;
    use crate::error::DbError;

    fn manifest() -> Manifest {
        Manifest::new(
            Version::from([1, 0]),
            Version::from([1, 0]),
            DnPolicy::CaseInsensitive,
        )
    }

    #[test]
    fn encode_decode() {
        let mut m = manifest();
        m.last_checkpoint = Some(SequenceNumber::new(42));

        let decoded = Manifest::decode(&m.encode().unwrap()).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn store_ids_are_unique() {
        assert_ne!(manifest().store_id, manifest().store_id);
    }

    #[test]
    fn newer_layout_is_schema_version_error() {
        let mut data = manifest().encode().unwrap();
        data[4..6].copy_from_slice(&2u16.to_le_bytes());
        let end = data.len() - 4;
        let crc = compute_crc32(&data[..end]);
        data[end..].copy_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            Manifest::decode(&data),
            Err(DbError::SchemaVersion {
                section: "manifest",
                found: 2,
                supported: MANIFEST_VERSION
            })
        ));
    }

    #[test]
    fn missing_field_is_schema_error() {
        #[derive(Serialize)]
        struct Partial {
            store_id: Uuid,
        }
        let body = to_cbor(&Partial {
            store_id: Uuid::new_v4(),
        })
        .unwrap();
        let data = frame(MANIFEST_MAGIC, MANIFEST_VERSION, &body).unwrap();

        assert!(matches!(Manifest::decode(&data), Err(DbError::Schema { .. })));
    }

    #[test]
    fn bad_magic() {
        let mut data = manifest().encode().unwrap();
        data[0] = b'X';
        assert!(matches!(Manifest::decode(&data), Err(DbError::Schema { .. })));
    }
}
