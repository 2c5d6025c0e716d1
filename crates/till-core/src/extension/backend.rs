//! Backend traits the runtime drives.
//!
//! The install pipeline and the startup loader are storage-agnostic: they
//! talk to the shared store through these traits. `till-store` provides the
//! redb-backed implementation; tests may substitute their own.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Result;
use crate::extension::manifest::{ExtensionManifest, PermissionDecl};

/// Summary of an extension's stored record.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub extension_id: String,
    pub name: String,
    pub version: String,
    pub namespace: String,
    pub entities: Vec<String>,
    pub is_installed: bool,
    pub is_active: bool,
}

/// Counts reported by a permission sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSyncReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl PermissionSyncReport {
    /// True when the sync wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Persistent record of installed extensions and their permission sets.
pub trait ExtensionCatalog: Send + Sync {
    /// Persist an extension as installed. Overwrites an existing record.
    fn record_installed(
        &self,
        manifest: &ExtensionManifest,
        install_path: &Path,
        active: bool,
    ) -> Result<()>;

    /// Remove an extension's record. Returns whether one existed.
    fn record_removed(&self, extension_id: &str) -> Result<bool>;

    /// Update the cached activity flag. The filesystem name stays the
    /// source of truth; this mirror is reconciled on every startup scan.
    fn set_active(&self, extension_id: &str, active: bool) -> Result<()>;

    /// Fetch one entry.
    fn get(&self, extension_id: &str) -> Result<Option<CatalogEntry>>;

    /// All entries.
    fn entries(&self) -> Result<Vec<CatalogEntry>>;

    /// Namespace labels of installed extensions, excluding `except`.
    fn namespaces(&self, except: Option<&str>) -> Result<BTreeSet<String>>;

    /// Entity names of installed extensions, excluding `except`.
    fn entities(&self, except: Option<&str>) -> Result<BTreeSet<String>>;

    /// Materialize an extension's declared permissions. Idempotent.
    fn sync_permissions(
        &self,
        extension_id: &str,
        permissions: &[PermissionDecl],
    ) -> Result<PermissionSyncReport>;
}

/// Schema surface of the shared store.
pub trait SchemaBackend: Send + Sync {
    /// Every table name in the live schema, host tables included.
    fn table_names(&self) -> Result<BTreeSet<String>>;

    /// Tables owned by one extension.
    fn tables_owned_by(&self, extension_id: &str) -> Result<Vec<String>>;

    /// Create the extension's declared tables. Idempotent for tables the
    /// extension already owns; refuses tables owned by anyone else.
    /// Returns the names actually created.
    fn migrate(&self, extension_id: &str, tables: &[String]) -> Result<Vec<String>>;

    /// Drop every table owned by the extension. Returns the dropped names.
    fn drop_owned(&self, extension_id: &str) -> Result<Vec<String>>;
}
