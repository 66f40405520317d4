//! Core type definitions for the mirror.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sequence number for ordering commits.
///
/// Every committed batch gets the next sequence number. Snapshots record the
/// last sequence they contain so journal replay can skip older batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Opaque resumption token issued by the server.
///
/// Cookies are compared for presence and equality only; their content is
/// owned by the server and never parsed here.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cookie(Bytes);

impl Cookie {
    /// Wraps raw cookie bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the cookie length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the cookie has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex rendering, for logs and tooling.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl From<&str> for Cookie {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Cookie {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({})", self.to_hex())
    }
}

/// How DNs are turned into store keys.
///
/// Fixed when the store is created and recorded in its manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnPolicy {
    /// DNs that differ only in case are the same entry.
    #[default]
    CaseInsensitive,
    /// DNs are compared byte for byte.
    CaseSensitive,
}

impl DnPolicy {
    /// Returns the store key for a DN.
    #[must_use]
    pub fn key(self, dn: &str) -> String {
        match self {
            Self::CaseInsensitive => dn.to_lowercase(),
            Self::CaseSensitive => dn.to_string(),
        }
    }

    /// Stable name used in manifests and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CaseInsensitive => "case-insensitive",
            Self::CaseSensitive => "case-sensitive",
        }
    }
}

impl fmt::Display for DnPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to one attribute of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeDelta {
    /// Add values that are not already present.
    Add {
        /// Attribute name.
        attribute: String,
        /// Values to add.
        values: Vec<Bytes>,
    },
    /// Remove the listed values, or the whole attribute when `values` is empty.
    Delete {
        /// Attribute name.
        attribute: String,
        /// Values to remove.
        values: Vec<Bytes>,
    },
    /// Set the attribute to exactly `values`; empty removes it.
    Replace {
        /// Attribute name.
        attribute: String,
        /// New values.
        values: Vec<Bytes>,
    },
}

impl AttributeDelta {
    /// Returns the attribute this delta touches.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Delete { attribute, .. }
            | Self::Replace { attribute, .. } => attribute,
        }
    }
}

/// A mirrored directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Distinguished name, as last delivered by the server.
    pub dn: String,
    /// Attribute name to ordered values.
    pub attributes: BTreeMap<String, Vec<Bytes>>,
    /// Reconciliation mark; cleared at the start of a present phase.
    pub present: bool,
    /// Cookie in force when this entry was last written.
    pub last_cookie_seen: Option<Cookie>,
}

impl Entry {
    /// Creates an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
            present: true,
            last_cookie_seen: None,
        }
    }

    /// Adds an attribute with the given values.
    #[must_use]
    pub fn with_attribute<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a text attribute.
    #[must_use]
    pub fn with_text(self, name: impl Into<String>, values: &[&str]) -> Self {
        self.with_attribute(
            name,
            values.iter().map(|v| Bytes::copy_from_slice(v.as_bytes())),
        )
    }

    /// Returns the values of an attribute.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&[Bytes]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Returns the values of an attribute decoded as UTF-8 (lossy).
    #[must_use]
    pub fn text_values(&self, name: &str) -> Vec<String> {
        self.values(name)
            .unwrap_or_default()
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    /// Applies a delta in place.
    ///
    /// Value-set semantics make every delta idempotent: adding a value that
    /// is already there or deleting one that is not changes nothing.
    pub fn apply_delta(&mut self, delta: &AttributeDelta) {
        match delta {
            AttributeDelta::Add { attribute, values } => {
                let current = self.attributes.entry(attribute.clone()).or_default();
                for value in values {
                    if !current.contains(value) {
                        current.push(value.clone());
                    }
                }
                if current.is_empty() {
                    self.attributes.remove(attribute);
                }
            }
            AttributeDelta::Delete { attribute, values } => {
                if values.is_empty() {
                    self.attributes.remove(attribute);
                    return;
                }
                if let Some(current) = self.attributes.get_mut(attribute) {
                    current.retain(|v| !values.contains(v));
                    if current.is_empty() {
                        self.attributes.remove(attribute);
                    }
                }
            }
            AttributeDelta::Replace { attribute, values } => {
                if values.is_empty() {
                    self.attributes.remove(attribute);
                    return;
                }
                let mut deduped: Vec<Bytes> = Vec::with_capacity(values.len());
                for value in values {
                    if !deduped.contains(value) {
                        deduped.push(value.clone());
                    }
                }
                self.attributes.insert(attribute.clone(), deduped);
            }
        }
    }

    /// Returns true if both entries carry the same DN and attributes,
    /// ignoring reconciliation marks and cookies.
    #[must_use]
    pub fn same_content(&self, other: &Entry) -> bool {
        self.dn == other.dn && self.attributes == other.attributes
    }
}
