//! Startup loader.
//!
//! Runs exactly once while the host boots, before it accepts traffic: walks
//! the extensions root, skips hidden and inactive directories, and registers
//! every active extension with the in-process registry, migrating its
//! declared tables and materializing its permission set on the way. One
//! extension failing to load never stops the others or the host; it is
//! logged and skipped. The stored activity flag is reconciled with the
//! directory names seen during the walk.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::extension::backend::{ExtensionCatalog, SchemaBackend};
use crate::extension::manifest::ExtensionManifest;
use crate::extension::registry::ExtensionRegistry;
use crate::extension::state::{LifecycleState, StateManager};

/// One extension the loader skipped, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedExtension {
    pub extension_id: String,
    pub reason: String,
}

/// What the startup scan did.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedExtension>,
    pub permissions_synced: usize,
}

/// Walks the extensions root at startup and registers active extensions.
pub struct Loader<'a> {
    state: StateManager,
    catalog: &'a dyn ExtensionCatalog,
    schema: &'a dyn SchemaBackend,
}

impl<'a> Loader<'a> {
    pub fn new(
        root: impl Into<std::path::PathBuf>,
        catalog: &'a dyn ExtensionCatalog,
        schema: &'a dyn SchemaBackend,
    ) -> Self {
        Self {
            state: StateManager::new(root),
            catalog,
            schema,
        }
    }

    /// Load every active extension into the registry.
    pub async fn load_all(&self, registry: &ExtensionRegistry) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let mut seen_active: BTreeSet<String> = BTreeSet::new();

        for entry in self.state.scan()? {
            match entry.state {
                LifecycleState::Hidden => continue,
                LifecycleState::Inactive => {
                    // Reconcile the cached flag; the record may be missing
                    // for never-installed directories, which is fine.
                    if self.catalog.get(&entry.extension_id)?.is_some() {
                        self.catalog.set_active(&entry.extension_id, false)?;
                    }
                    continue;
                }
                LifecycleState::Active => {}
            }

            seen_active.insert(entry.extension_id.clone());
            match self.load_one(registry, &entry.extension_id, &entry.path).await {
                Ok(permissions) => {
                    report.permissions_synced += permissions;
                    report.loaded.push(entry.extension_id.clone());
                }
                Err(err) => {
                    warn!(
                        extension_id = %entry.extension_id,
                        error = %err,
                        "extension failed to load; skipping"
                    );
                    report.skipped.push(SkippedExtension {
                        extension_id: entry.extension_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        // Directories may have been deactivated or removed since the record
        // was written; the stored flag is only a cache of the name.
        for record in self.catalog.entries()? {
            if record.is_active && !seen_active.contains(&record.extension_id) {
                self.catalog.set_active(&record.extension_id, false)?;
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "extension startup scan complete"
        );
        Ok(report)
    }

    async fn load_one(
        &self,
        registry: &ExtensionRegistry,
        id: &str,
        path: &std::path::Path,
    ) -> Result<usize> {
        let manifest = ExtensionManifest::load(path).map_err(|e| Error::Load {
            extension_id: id.to_string(),
            reason: e.to_string(),
        })?;
        if manifest.id != id {
            return Err(Error::Load {
                extension_id: id.to_string(),
                reason: format!("directory name does not match manifest id {}", manifest.id),
            });
        }

        registry.register(manifest.clone(), path.to_path_buf()).await?;

        // Entity-model import may introduce tables added since install.
        self.schema
            .migrate(&manifest.id, &manifest.schema.tables)
            .map_err(|e| Error::Load {
                extension_id: id.to_string(),
                reason: format!("schema migration failed: {}", e),
            })?;

        let sync = self
            .catalog
            .sync_permissions(&manifest.id, &manifest.permissions)?;

        // Extensions installed out-of-band get a record on first load.
        if self.catalog.get(id)?.is_none() {
            self.catalog.record_installed(&manifest, path, true)?;
        } else {
            self.catalog.set_active(id, true)?;
        }

        info!(
            extension_id = %id,
            version = %manifest.version,
            permissions = manifest.permissions.len(),
            "extension loaded"
        );
        Ok(sync.created + sync.updated + sync.unchanged)
    }
}
