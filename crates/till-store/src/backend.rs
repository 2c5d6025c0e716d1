//! Backend wiring for the extension runtime.
//!
//! Bundles the individual stores behind the traits `till-core` drives, so
//! the install pipeline and the startup loader stay storage-agnostic.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use till_core::extension::backend::{
    CatalogEntry, ExtensionCatalog, PermissionSyncReport, SchemaBackend,
};
use till_core::extension::manifest::{ExtensionManifest, PermissionDecl};

use crate::extensions::{ExtensionRecord, ExtensionStore};
use crate::permissions::PermissionStore;
use crate::schema::SchemaStore;
use crate::{Result, SharedDb};

/// The redb-backed implementation of the runtime's backend traits.
pub struct StoreBackend {
    extensions: ExtensionStore,
    permissions: PermissionStore,
    schema: SchemaStore,
}

impl StoreBackend {
    /// Open the shared store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = SharedDb::open(path)?;
        Ok(Self::with_db(db))
    }

    pub fn with_db(db: Arc<SharedDb>) -> Self {
        Self {
            extensions: ExtensionStore::new(db.clone()),
            permissions: PermissionStore::new(db.clone()),
            schema: SchemaStore::new(db),
        }
    }

    pub fn extensions(&self) -> &ExtensionStore {
        &self.extensions
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }
}

fn entry_from_record(record: ExtensionRecord) -> CatalogEntry {
    CatalogEntry {
        extension_id: record.id,
        name: record.name,
        version: record.version,
        namespace: record.namespace,
        entities: record.entities,
        is_installed: record.is_installed,
        is_active: record.is_active,
    }
}

impl ExtensionCatalog for StoreBackend {
    fn record_installed(
        &self,
        manifest: &ExtensionManifest,
        install_path: &Path,
        active: bool,
    ) -> till_core::Result<()> {
        let mut record = ExtensionRecord::new(
            manifest.id.clone(),
            manifest.name.clone(),
            manifest.version.to_string(),
            manifest.author.clone(),
        );
        record.pricing = manifest.pricing.to_string();
        record.namespace = manifest.namespace().to_string();
        record.entities = manifest.schema.entities.clone();
        record.tables = manifest.schema.tables.clone();
        record.dependencies = manifest.dependencies.clone();
        record.url_prefix = manifest.url_prefix.clone();
        record.menu = manifest.menu.clone();
        record.install_path = install_path.to_string_lossy().to_string();
        record.is_active = active;
        self.extensions.save(&record)?;
        Ok(())
    }

    fn record_removed(&self, extension_id: &str) -> till_core::Result<bool> {
        Ok(self.extensions.delete(extension_id)?)
    }

    fn set_active(&self, extension_id: &str, active: bool) -> till_core::Result<()> {
        self.extensions.set_active(extension_id, active)?;
        Ok(())
    }

    fn get(&self, extension_id: &str) -> till_core::Result<Option<CatalogEntry>> {
        Ok(self.extensions.load(extension_id)?.map(entry_from_record))
    }

    fn entries(&self) -> till_core::Result<Vec<CatalogEntry>> {
        Ok(self
            .extensions
            .load_all()?
            .into_iter()
            .map(entry_from_record)
            .collect())
    }

    fn namespaces(&self, except: Option<&str>) -> till_core::Result<BTreeSet<String>> {
        Ok(self
            .extensions
            .load_all()?
            .into_iter()
            .filter(|r| Some(r.id.as_str()) != except)
            .map(|r| {
                if r.namespace.is_empty() {
                    r.id
                } else {
                    r.namespace
                }
            })
            .collect())
    }

    fn entities(&self, except: Option<&str>) -> till_core::Result<BTreeSet<String>> {
        Ok(self
            .extensions
            .load_all()?
            .into_iter()
            .filter(|r| Some(r.id.as_str()) != except)
            .flat_map(|r| r.entities)
            .collect())
    }

    fn sync_permissions(
        &self,
        extension_id: &str,
        permissions: &[PermissionDecl],
    ) -> till_core::Result<PermissionSyncReport> {
        let declared: Vec<(String, String)> = permissions
            .iter()
            .map(|p| (format!("{}.{}", extension_id, p.action), p.name.clone()))
            .collect();
        let outcome = self.permissions.sync_extension(extension_id, &declared)?;
        Ok(PermissionSyncReport {
            created: outcome.created,
            updated: outcome.updated,
            removed: outcome.removed,
            unchanged: outcome.unchanged,
        })
    }
}

impl SchemaBackend for StoreBackend {
    fn table_names(&self) -> till_core::Result<BTreeSet<String>> {
        Ok(self.schema.table_names()?)
    }

    fn tables_owned_by(&self, extension_id: &str) -> till_core::Result<Vec<String>> {
        Ok(self.schema.tables_owned_by(extension_id)?)
    }

    fn migrate(&self, extension_id: &str, tables: &[String]) -> till_core::Result<Vec<String>> {
        Ok(self.schema.migrate(extension_id, tables)?)
    }

    fn drop_owned(&self, extension_id: &str) -> till_core::Result<Vec<String>> {
        Ok(self.schema.drop_owned(extension_id)?)
    }
}
