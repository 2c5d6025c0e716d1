//! The archive install pipeline.
//!
//! Installation runs in fixed steps, each short-circuiting on failure:
//! checksum verification, extraction into a hidden staging directory,
//! manifest validation, conflict detection, dependency staging, scoped
//! schema migration, locale compilation, and record persistence. A failure
//! before migration cleans the staging directory up; a failure at or after
//! migration leaves it staged for operator inspection. A successful install
//! lands the extension inactive (`_<id>`), so nothing loads until an
//! operator activates it and restarts the host.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::extension::archive;
use crate::extension::backend::{ExtensionCatalog, SchemaBackend};
use crate::extension::conflict::{self, LiveSchema, UndeclaredTable};
use crate::extension::i18n;
use crate::extension::manifest::ExtensionManifest;
use crate::extension::state::{dir_name_for, LifecycleState, StateManager};
use crate::extension::validate::{self, SecurityWarning};

/// Directory name prefix used while an archive is being staged. Staging
/// directories are hidden, so the loader never scans them.
const STAGING_PREFIX: &str = ".stage-";

/// Per-id locks serializing concurrent install/uninstall of the same
/// extension within this process, so directory renames never race.
static INSTALL_LOCKS: Mutex<BTreeMap<String, Arc<Mutex<()>>>> = Mutex::new(BTreeMap::new());

fn install_lock(extension_id: &str) -> Arc<Mutex<()>> {
    let mut locks = INSTALL_LOCKS.lock().expect("install lock registry poisoned");
    locks
        .entry(extension_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Result of a successful install.
#[derive(Debug)]
pub struct InstallOutcome {
    pub extension_id: String,
    pub version: String,
    pub install_path: PathBuf,
    pub security_warnings: Vec<SecurityWarning>,
    pub undeclared_tables: Vec<UndeclaredTable>,
    pub created_tables: Vec<String>,
    pub locales_compiled: usize,
}

/// Result of an uninstall.
#[derive(Debug)]
pub struct UninstallOutcome {
    pub extension_id: String,
    /// Data tables left behind. Non-empty means the operator was warned.
    pub preserved_tables: Vec<String>,
}

/// Orchestrates install, uninstall, validate, and purge against one
/// extensions root.
pub struct Installer<'a> {
    state: StateManager,
    catalog: &'a dyn ExtensionCatalog,
    schema: &'a dyn SchemaBackend,
}

impl<'a> Installer<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        catalog: &'a dyn ExtensionCatalog,
        schema: &'a dyn SchemaBackend,
    ) -> Self {
        Self {
            state: StateManager::new(root),
            catalog,
            schema,
        }
    }

    /// Run the full install pipeline on an archive.
    pub fn install(&self, archive_path: &Path) -> Result<InstallOutcome> {
        // Step 1: package integrity, then a peek at the manifest for the id.
        archive::verify_checksum(archive_path)?;
        let peeked = archive::read_manifest(archive_path)?;
        let id = peeked.id.clone();

        let lock = install_lock(&id);
        let _guard = lock.lock().expect("install lock poisoned");

        if let Some((_, state)) = self.state.dir_of(&id) {
            return Err(Error::State(format!(
                "extension {} already present on disk ({})",
                id, state
            )));
        }
        if self.catalog.get(&id)?.is_some() {
            return Err(Error::State(format!(
                "extension {} is already installed",
                id
            )));
        }

        let staging = self.staging_dir(&id);
        if staging.exists() {
            return Err(Error::State(format!(
                "a staged copy of {} exists at {}; inspect and remove it before reinstalling",
                id,
                staging.display()
            )));
        }

        fs::create_dir_all(self.state.root())?;
        archive::unpack(archive_path, &staging)?;

        match self.install_staged(&id, &staging) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Validation and conflict failures must leave nothing behind
                // beyond the staging extraction, which is removed here.
                // Later failures keep the staged copy for inspection.
                if err.exit_code() != 3 {
                    if let Err(cleanup) = fs::remove_dir_all(&staging) {
                        warn!(extension_id = %id, error = %cleanup, "failed to clean staging directory");
                    }
                } else {
                    warn!(
                        extension_id = %id,
                        staging = %staging.display(),
                        "install failed after extraction; staged copy kept for inspection"
                    );
                }
                Err(err)
            }
        }
    }

    fn install_staged(&self, id: &str, staging: &Path) -> Result<InstallOutcome> {
        // Step 2: manifest validation.
        let manifest = ExtensionManifest::load(staging)?;
        if manifest.id != id {
            return Err(Error::Validation(format!(
                "archive manifest id {} does not match {}",
                manifest.id, id
            )));
        }
        let report = validate::validate_extension(staging, &manifest)?;

        // Step 3: conflict detection against the live schema.
        let live = self.live_schema(None)?;
        conflict::detect_conflicts(&manifest, &live)?;
        let undeclared = conflict::scan_undeclared_tables(staging, &manifest)?;

        // Step 4: dependency staging. The host environment is closed, so
        // this only verifies the bundled set satisfies the declarations.
        validate::check_bundled_availability(&manifest)?;

        // Step 5: schema migration, scoped to this extension.
        let created_tables = self
            .schema
            .migrate(&manifest.id, &manifest.schema.tables)
            .map_err(|e| Error::Migration {
                extension_id: manifest.id.clone(),
                reason: e.to_string(),
            })?;

        // Step 6: locale compilation.
        let locales_compiled = i18n::compile_locales(staging).map_err(|e| Error::Migration {
            extension_id: manifest.id.clone(),
            reason: format!("locale compilation failed: {}", e),
        })?;

        // Step 7: land inactive and persist the record.
        let install_path = self
            .state
            .root()
            .join(dir_name_for(id, LifecycleState::Inactive));
        fs::rename(staging, &install_path)?;
        self.catalog
            .record_installed(&manifest, &install_path, false)?;

        info!(
            extension_id = %manifest.id,
            version = %manifest.version,
            tables = created_tables.len(),
            "extension installed (inactive until activated and host restarted)"
        );

        Ok(InstallOutcome {
            extension_id: manifest.id.clone(),
            version: manifest.version.to_string(),
            install_path,
            security_warnings: report.warnings,
            undeclared_tables: undeclared,
            created_tables,
            locales_compiled,
        })
    }

    /// Run validation and conflict detection on an extension directory
    /// without installing anything.
    ///
    /// Works for extensions in any lifecycle state; an installed
    /// extension's own registrations are excluded from the conflict check.
    pub fn validate_only(&self, id: &str) -> Result<(ExtensionManifest, validate::ValidationReport)> {
        let (dir, _) = self
            .state
            .dir_of(id)
            .ok_or_else(|| Error::State(format!("extension {} not found on disk", id)))?;
        let manifest = ExtensionManifest::load(&dir)?;
        let report = validate::validate_extension(&dir, &manifest)?;
        validate::check_bundled_availability(&manifest)?;

        let mut live = self.live_schema(Some(id))?;
        for table in self.schema.tables_owned_by(id)? {
            live.tables.remove(&table);
        }
        conflict::detect_conflicts(&manifest, &live)?;
        conflict::scan_undeclared_tables(&dir, &manifest)?;
        Ok((manifest, report))
    }

    /// Uninstall an extension: remove its record and directory.
    ///
    /// Refuses while the extension is active. Data tables are preserved;
    /// the outcome lists them so the caller can warn the operator.
    pub fn uninstall(&self, id: &str) -> Result<UninstallOutcome> {
        let lock = install_lock(id);
        let _guard = lock.lock().expect("install lock poisoned");

        if self.state.state_of(id) == Some(LifecycleState::Active) {
            return Err(Error::State(format!(
                "extension {} is active; deactivate it first",
                id
            )));
        }

        let existed = self.catalog.record_removed(id)?;
        let on_disk = self.state.dir_of(id).is_some();
        if !existed && !on_disk {
            return Err(Error::State(format!("extension {} is not installed", id)));
        }
        if on_disk {
            self.state.delete(id)?;
        }

        let preserved_tables = self.schema.tables_owned_by(id)?;
        if !preserved_tables.is_empty() {
            warn!(
                extension_id = %id,
                tables = preserved_tables.len(),
                "data tables preserved; run purge to drop them"
            );
        }
        info!(extension_id = %id, "extension uninstalled");
        Ok(UninstallOutcome {
            extension_id: id.to_string(),
            preserved_tables,
        })
    }

    /// Drop the data tables an uninstalled extension left behind.
    ///
    /// Separate from uninstall and strictly opt-in. Refuses while a record
    /// or directory still exists.
    pub fn purge(&self, id: &str) -> Result<Vec<String>> {
        if self.catalog.get(id)?.is_some() || self.state.dir_of(id).is_some() {
            return Err(Error::State(format!(
                "extension {} is still installed; uninstall it before purging data",
                id
            )));
        }
        let dropped = self.schema.drop_owned(id)?;
        info!(extension_id = %id, tables = dropped.len(), "extension data purged");
        Ok(dropped)
    }

    /// Snapshot the live schema for conflict checks.
    fn live_schema(&self, except: Option<&str>) -> Result<LiveSchema> {
        Ok(LiveSchema {
            tables: self.schema.table_names()?,
            namespaces: self.catalog.namespaces(except)?,
            entities: self.catalog.entities(except)?,
        })
    }

    fn staging_dir(&self, id: &str) -> PathBuf {
        self.state.root().join(format!("{}{}", STAGING_PREFIX, id))
    }
}
