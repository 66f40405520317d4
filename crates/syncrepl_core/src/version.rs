//! Version and compatibility guard.
//!
//! A mirror records two versions in its manifest:
//!
//! - [`Component::EngineFormat`]: the on-disk container layout (journal,
//!   snapshot, manifest).
//! - [`Component::HostRuntime`]: the codec generation used to serialize
//!   entry payloads.
//!
//! Opening a mirror compares both against the running build before any
//! entry is read. Minor versions within one major are compatible in both
//! directions. A stored major newer than ours is refused. An older engine
//! format is always readable. An older host runtime major can be brought
//! forward one step at a time by a registered [`RuntimeMigration`]; a gap
//! of more than one major is refused outright.

use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Engine format version written by this build.
pub const ENGINE_FORMAT_VERSION: [u32; 2] = [1, 0];

/// Entry codec generation written by this build.
pub const HOST_RUNTIME_VERSION: [u32; 2] = [1, 0];

/// A versioned component of the persisted mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    /// On-disk container layout.
    EngineFormat,
    /// Entry payload codec generation.
    HostRuntime,
}

impl Component {
    /// Stable name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EngineFormat => "engine format",
            Self::HostRuntime => "host runtime",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered tuple of version numbers. The first element is the major.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(Vec<u32>);

impl Version {
    /// Creates a version from its parts.
    pub fn new(parts: impl Into<Vec<u32>>) -> Self {
        Self(parts.into())
    }

    /// Returns the major version (0 if the tuple is empty).
    #[must_use]
    pub fn major(&self) -> u32 {
        self.0.first().copied().unwrap_or(0)
    }

    /// Returns the minor version (0 if absent).
    #[must_use]
    pub fn minor(&self) -> u32 {
        self.0.get(1).copied().unwrap_or(0)
    }

    /// Returns all parts.
    #[must_use]
    pub fn parts(&self) -> &[u32] {
        &self.0
    }
}

impl From<[u32; 2]> for Version {
    fn from(value: [u32; 2]) -> Self {
        Self(value.to_vec())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// A component together with its version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Which component.
    pub component: Component,
    /// Its version.
    pub version: Version,
}

impl VersionInfo {
    /// Creates a version record.
    pub fn new(component: Component, version: impl Into<Version>) -> Self {
        Self {
            component,
            version: version.into(),
        }
    }

    /// The engine format this build writes.
    #[must_use]
    pub fn current_format() -> Self {
        Self::new(Component::EngineFormat, ENGINE_FORMAT_VERSION)
    }

    /// The host runtime this build writes.
    #[must_use]
    pub fn current_runtime() -> Self {
        Self::new(Component::HostRuntime, HOST_RUNTIME_VERSION)
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.component, self.version)
    }
}

/// A stored version cannot be used by the running build.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    /// Two different components were compared.
    #[error("cannot compare {stored} against {running}")]
    ComponentMismatch {
        /// Component of the stored record.
        stored: Component,
        /// Component of the running record.
        running: Component,
    },

    /// The store was written by a newer major version.
    #[error("{component} is version {theirs}, but we are {ours}")]
    TooNew {
        /// Component that failed.
        component: Component,
        /// Running version.
        ours: Version,
        /// Stored version.
        theirs: Version,
    },

    /// The stored major is more than one step behind.
    #[error("cannot jump {component} from major {} to major {}", theirs.major(), ours.major())]
    Jump {
        /// Component that failed.
        component: Component,
        /// Running version.
        ours: Version,
        /// Stored version.
        theirs: Version,
    },

    /// The stored major is one step behind and nothing can migrate it.
    #[error("{component} is version {from}, but we are {to} and no migration is registered")]
    NoMigration {
        /// Component that failed.
        component: Component,
        /// Stored version.
        from: Version,
        /// Running version.
        to: Version,
    },
}

impl VersionError {
    /// Returns true for the multi-step jump case.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        matches!(self, Self::Jump { .. })
    }

    /// Returns the component that failed.
    #[must_use]
    pub fn component(&self) -> Component {
        match self {
            Self::ComponentMismatch { stored, .. } => *stored,
            Self::TooNew { component, .. }
            | Self::Jump { component, .. }
            | Self::NoMigration { component, .. } => *component,
        }
    }
}

/// Checks a stored version against the running one.
///
/// Pure: touches nothing and logs nothing. An older engine format major is
/// accepted. An older host runtime major always fails here;
/// [`VersionGuard::validate`] is where registered migrations let a
/// single-step gap through.
///
/// # Errors
///
/// See [`VersionError`] for the individual cases.
pub fn check(stored: &VersionInfo, running: &VersionInfo) -> Result<(), VersionError> {
    if stored.component != running.component {
        return Err(VersionError::ComponentMismatch {
            stored: stored.component,
            running: running.component,
        });
    }

    let (theirs, ours) = (stored.version.major(), running.version.major());
    if theirs > ours {
        return Err(VersionError::TooNew {
            component: stored.component,
            ours: running.version.clone(),
            theirs: stored.version.clone(),
        });
    }

    if theirs < ours && stored.component == Component::HostRuntime {
        if ours - theirs > 1 {
            return Err(VersionError::Jump {
                component: stored.component,
                ours: running.version.clone(),
                theirs: stored.version.clone(),
            });
        }
        return Err(VersionError::NoMigration {
            component: stored.component,
            from: stored.version.clone(),
            to: running.version.clone(),
        });
    }

    Ok(())
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    /// Stored versions equal the running ones.
    Current,
    /// Same majors, different minors; usable as is.
    Compatible,
    /// The host runtime is one major behind and a migration will run on load.
    Migrate {
        /// Stored runtime version.
        from: Version,
        /// Runtime version after migration.
        to: Version,
    },
}

impl Compatibility {
    /// Returns true if loading will rewrite entry payloads.
    #[must_use]
    pub fn needs_migration(&self) -> bool {
        matches!(self, Self::Migrate { .. })
    }
}

/// Rewrites entry payloads written by an older host runtime major.
pub trait RuntimeMigration: Send + Sync {
    /// Major version this migration reads. It produces `from_major() + 1`.
    fn from_major(&self) -> u32;

    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Converts one raw entry payload to the next generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be converted; the open fails.
    fn migrate_entry(&self, raw: Vec<u8>) -> DbResult<Vec<u8>>;
}

/// Registered host runtime migrations, keyed by source major.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<u32, Arc<dyn RuntimeMigration>>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration, replacing any previous one for the same major.
    pub fn register(&mut self, migration: Arc<dyn RuntimeMigration>) {
        self.migrations.insert(migration.from_major(), migration);
    }

    /// Returns the migration reading `major`, if registered.
    #[must_use]
    pub fn get(&self, major: u32) -> Option<Arc<dyn RuntimeMigration>> {
        self.migrations.get(&major).cloned()
    }

    /// Returns the number of registered migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("from_majors", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Running versions plus the migrations this build can apply.
#[derive(Debug, Clone)]
pub struct VersionGuard {
    format: VersionInfo,
    runtime: VersionInfo,
    migrations: MigrationRegistry,
}

impl Default for VersionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionGuard {
    /// Creates a guard for this build's versions with no migrations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: VersionInfo::current_format(),
            runtime: VersionInfo::current_runtime(),
            migrations: MigrationRegistry::new(),
        }
    }

    /// Overrides the running versions (used by tests and tooling).
    #[must_use]
    pub fn with_versions(
        mut self,
        format: impl Into<Version>,
        runtime: impl Into<Version>,
    ) -> Self {
        self.format = VersionInfo::new(Component::EngineFormat, format);
        self.runtime = VersionInfo::new(Component::HostRuntime, runtime);
        self
    }

    /// Registers a host runtime migration.
    #[must_use]
    pub fn with_migration(mut self, migration: Arc<dyn RuntimeMigration>) -> Self {
        self.migrations.register(migration);
        self
    }

    /// Running engine format.
    #[must_use]
    pub fn format(&self) -> &VersionInfo {
        &self.format
    }

    /// Running host runtime.
    #[must_use]
    pub fn runtime(&self) -> &VersionInfo {
        &self.runtime
    }

    /// Returns the migration for a stored runtime major, if any.
    #[must_use]
    pub fn migration_for(&self, major: u32) -> Option<Arc<dyn RuntimeMigration>> {
        self.migrations.get(major)
    }

    /// Validates stored versions against the running build.
    ///
    /// # Errors
    ///
    /// Returns the [`VersionError`] from [`check`] unless the failure is a
    /// single-step host runtime gap with a registered migration.
    pub fn validate(
        &self,
        stored_format: &VersionInfo,
        stored_runtime: &VersionInfo,
    ) -> Result<Compatibility, VersionError> {
        check(stored_format, &self.format)?;

        match check(stored_runtime, &self.runtime) {
            Ok(()) => {}
            Err(VersionError::NoMigration { component, from, to }) => {
                return if self.migrations.get(from.major()).is_some() {
                    Ok(Compatibility::Migrate { from, to })
                } else {
                    Err(VersionError::NoMigration { component, from, to })
                };
            }
            Err(e) => return Err(e),
        }

        if stored_format == &self.format && stored_runtime == &self.runtime {
            Ok(Compatibility::Current)
        } else {
            Ok(Compatibility::Compatible)
        }
    }
}
