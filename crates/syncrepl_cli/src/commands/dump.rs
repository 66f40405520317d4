//! Dump command implementation.

use super::open_existing;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use syncrepl_core::{DbResult, Entry, Store};

/// One attribute value. UTF-8 values print as text, others as hex.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DumpValue {
    /// A UTF-8 value.
    Text(String),
    /// A binary value.
    Binary {
        /// Hex encoded bytes.
        hex: String,
    },
}

impl DumpValue {
    fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Text(text.to_string()),
            Err(_) => Self::Binary {
                hex: bytes.iter().map(|b| format!("{b:02x}")).collect(),
            },
        }
    }
}

/// Entry representation for output.
#[derive(Debug, Serialize)]
pub struct DumpEntry {
    /// Distinguished name.
    pub dn: String,
    /// Attribute values.
    pub attributes: BTreeMap<String, Vec<DumpValue>>,
    /// Reconciliation mark.
    pub present: bool,
    /// Cookie in force when the entry was written, hex encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cookie_seen: Option<String>,
}

impl From<&Entry> for DumpEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            dn: entry.dn.clone(),
            attributes: entry
                .attributes
                .iter()
                .map(|(name, values)| {
                    (
                        name.clone(),
                        values.iter().map(|v| DumpValue::from_bytes(v)).collect(),
                    )
                })
                .collect(),
            present: entry.present,
            last_cookie_seen: entry.last_cookie_seen.as_ref().map(|c| c.to_hex()),
        }
    }
}

/// Reads entries in DN key order, keeping those under `suffix`.
pub fn read_entries(
    store: &Store,
    limit: Option<usize>,
    suffix: Option<&str>,
) -> DbResult<Vec<DumpEntry>> {
    let suffix = suffix.map(str::to_ascii_lowercase);
    let mut entries = Vec::new();
    for dn in store.all_dns()? {
        if limit.is_some_and(|limit| entries.len() >= limit) {
            break;
        }
        if let Some(suffix) = &suffix {
            if !dn.to_ascii_lowercase().ends_with(suffix.as_str()) {
                continue;
            }
        }
        if let Some(entry) = store.get(&dn)? {
            entries.push(DumpEntry::from(&entry));
        }
    }
    Ok(entries)
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    suffix: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let entries = read_entries(&store, limit, suffix)?;
    store.close()?;

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|txn| {
                txn.put(Entry::new("cn=a,ou=people,dc=example,dc=com").with_text("cn", &["a"]))?;
                txn.put(Entry::new("cn=b,ou=people,dc=example,dc=com").with_text("cn", &["b"]))?;
                txn.put(
                    Entry::new("cn=admins,ou=groups,dc=example,dc=com")
                        .with_attribute("jpegPhoto", [vec![0xFFu8, 0xD8]]),
                )
            })
            .unwrap();
        store
    }

    #[test]
    fn binary_values_are_hex() {
        let store = populated();
        let entries = read_entries(&store, None, Some("ou=groups,dc=example,dc=com")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].attributes["jpegPhoto"],
            vec![DumpValue::Binary { hex: "ffd8".into() }]
        );

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["attributes"]["jpegPhoto"][0]["hex"], "ffd8");
        assert!(json.get("last_cookie_seen").is_none());
    }

    #[test]
    fn suffix_ignores_case() {
        let store = populated();
        let entries = read_entries(&store, None, Some("OU=People,DC=example,DC=com")).unwrap();
        let dns: Vec<&str> = entries.iter().map(|e| e.dn.as_str()).collect();
        assert_eq!(
            dns,
            vec!["cn=a,ou=people,dc=example,dc=com", "cn=b,ou=people,dc=example,dc=com"]
        );
        assert_eq!(entries[0].attributes["cn"], vec![DumpValue::Text("a".into())]);
    }

    #[test]
    fn limit_stops_early() {
        let store = populated();
        assert_eq!(read_entries(&store, Some(2), None).unwrap().len(), 2);
        assert_eq!(read_entries(&store, Some(0), None).unwrap().len(), 0);
    }
}
