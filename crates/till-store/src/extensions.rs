//! Extension record storage.
//!
//! One row per installed extension. The `is_active` column is a cache of
//! the extension's directory name, reconciled on every startup scan; the
//! filesystem stays the source of truth for lifecycle state.

use std::sync::Arc;

use chrono::Utc;
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use till_core::extension::manifest::{DependencyDecl, MenuDecl};

use crate::error::{Error, Result};
use crate::SharedDb;

// Extensions table: key = extension_id, value = ExtensionRecord (serialized)
pub(crate) const EXTENSIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("extensions");

/// Stored record of an installed extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRecord {
    /// Extension ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Version
    pub version: String,

    /// Author
    pub author: String,

    /// Pricing model ("free", "paid", "subscription")
    pub pricing: String,

    /// Namespace label registered for this extension
    pub namespace: String,

    /// Entity names registered for this extension
    #[serde(default)]
    pub entities: Vec<String>,

    /// Declared storage table names
    #[serde(default)]
    pub tables: Vec<String>,

    /// Declared third-party dependencies
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,

    /// Contributed URL prefix
    #[serde(default)]
    pub url_prefix: Option<String>,

    /// Contributed menu entry
    #[serde(default)]
    pub menu: Option<MenuDecl>,

    /// Directory the extension was installed into
    pub install_path: String,

    /// Whether the install pipeline completed
    pub is_installed: bool,

    /// Cache of the directory-name lifecycle state
    pub is_active: bool,

    /// Last updated timestamp
    pub updated_at: i64,

    /// Registered at timestamp
    pub registered_at: i64,
}

impl ExtensionRecord {
    /// Create a new record marked installed.
    pub fn new(id: String, name: String, version: String, author: String) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id,
            name,
            version,
            author,
            pricing: "free".to_string(),
            namespace: String::new(),
            entities: Vec::new(),
            tables: Vec::new(),
            dependencies: Vec::new(),
            url_prefix: None,
            menu: None,
            install_path: String::new(),
            is_installed: true,
            is_active: false,
            updated_at: now,
            registered_at: now,
        }
    }

    /// Update the timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp();
    }

    /// Validate the record
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("Extension ID cannot be empty".to_string());
        }
        if self.name.is_empty() {
            return Err("Extension name cannot be empty".to_string());
        }
        if self.version.is_empty() {
            return Err("Version cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Statistics over the extension records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_extensions: usize,
    pub active_count: usize,
    pub installed_count: usize,
}

/// Extension record storage.
pub struct ExtensionStore {
    db: Arc<SharedDb>,
}

impl ExtensionStore {
    pub fn new(db: Arc<SharedDb>) -> Self {
        Self { db }
    }

    /// Save an extension record
    pub fn save(&self, record: &ExtensionRecord) -> Result<()> {
        record
            .validate()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let mut record = record.clone();
        record.touch();

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EXTENSIONS_TABLE)?;
            let value = serde_json::to_vec(&record)?;
            table.insert(record.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load an extension record by ID
    pub fn load(&self, id: &str) -> Result<Option<ExtensionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXTENSIONS_TABLE)?;

        if let Some(data) = table.get(id)? {
            let record: ExtensionRecord = serde_json::from_slice(data.value())?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// Load all extension records
    pub fn load_all(&self) -> Result<Vec<ExtensionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXTENSIONS_TABLE)?;

        let mut records = Vec::new();
        for result in table.iter()? {
            let (_, data) = result?;
            let record: ExtensionRecord = serde_json::from_slice(data.value())?;
            records.push(record);
        }
        Ok(records)
    }

    /// Delete an extension record
    pub fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(EXTENSIONS_TABLE)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Check if an extension record exists
    pub fn contains(&self, id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXTENSIONS_TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    /// Update the cached activity flag.
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let mut record = self
            .load(id)?
            .ok_or_else(|| Error::NotFound(format!("extension {}", id)))?;
        if record.is_active != active {
            record.is_active = active;
            self.save(&record)?;
        }
        Ok(())
    }

    /// Get statistics about stored extensions
    pub fn stats(&self) -> Result<StoreStats> {
        let all = self.load_all()?;
        let active_count = all.iter().filter(|r| r.is_active).count();
        let installed_count = all.iter().filter(|r| r.is_installed).count();
        Ok(StoreStats {
            total_extensions: all.len(),
            active_count,
            installed_count,
        })
    }
}
