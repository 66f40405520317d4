//! CLI command implementations.

pub mod checkpoint;
pub mod dump;
pub mod inspect;
pub mod verify;

use std::path::Path;
use syncrepl_core::{Store, StoreConfig};

/// Opens an existing mirror. Never creates one.
pub(crate) fn open_existing(path: &Path) -> Result<Store, Box<dyn std::error::Error>> {
    if !path.join("MANIFEST").exists() {
        return Err(format!("No mirror found at {:?}", path).into());
    }
    Ok(Store::open_with_config(
        path,
        StoreConfig::new().create_if_missing(false),
    )?)
}
