//! Schema data dictionary.
//!
//! Extension data tables live in the shared store and are registered here
//! with their owning extension. Migration is strictly scoped: an extension
//! can only create tables nobody else owns and only drop its own. The
//! dictionary, unioned with the physical table list, is what conflict
//! detection introspects, so tables preserved after an uninstall keep
//! blocking colliding installs until they are purged.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use redb::{ReadableTable, TableDefinition, TableHandle};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::SharedDb;

// Data dictionary: key = table name, value = TableOwner (serialized)
pub(crate) const DATA_DICTIONARY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("schema_tables");

/// Ownership entry for one extension data table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableOwner {
    extension_id: String,
    created_at: i64,
}

/// Schema surface of the shared store.
pub struct SchemaStore {
    db: Arc<SharedDb>,
}

impl SchemaStore {
    pub fn new(db: Arc<SharedDb>) -> Self {
        Self { db }
    }

    /// Every table name in the live schema: physical host tables plus the
    /// data dictionary.
    pub fn table_names(&self) -> Result<BTreeSet<String>> {
        let read_txn = self.db.begin_read()?;
        let mut names = BTreeSet::new();
        for handle in read_txn.list_tables()? {
            names.insert(handle.name().to_string());
        }
        let table = read_txn.open_table(DATA_DICTIONARY_TABLE)?;
        for result in table.iter()? {
            let (key, _) = result?;
            names.insert(key.value().to_string());
        }
        Ok(names)
    }

    /// Owner of a table, if it is an extension data table.
    pub fn owner_of(&self, table_name: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DATA_DICTIONARY_TABLE)?;
        if let Some(data) = table.get(table_name)? {
            let owner: TableOwner = serde_json::from_slice(data.value())?;
            Ok(Some(owner.extension_id))
        } else {
            Ok(None)
        }
    }

    /// Tables owned by one extension, sorted.
    pub fn tables_owned_by(&self, extension_id: &str) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DATA_DICTIONARY_TABLE)?;
        let mut names = Vec::new();
        for result in table.iter()? {
            let (key, data) = result?;
            let owner: TableOwner = serde_json::from_slice(data.value())?;
            if owner.extension_id == extension_id {
                names.push(key.value().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Register the extension's declared tables.
    ///
    /// Idempotent for tables the extension already owns. Refuses tables
    /// owned by another extension or shadowing a host table. Returns the
    /// names actually created.
    pub fn migrate(&self, extension_id: &str, tables: &[String]) -> Result<Vec<String>> {
        let existing = self.table_names()?;
        let mut created = Vec::new();

        let write_txn = self.db.begin_write()?;
        {
            let mut dict = write_txn.open_table(DATA_DICTIONARY_TABLE)?;
            for name in tables {
                if let Some(data) = dict.get(name.as_str())? {
                    let owner: TableOwner = serde_json::from_slice(data.value())?;
                    if owner.extension_id != extension_id {
                        return Err(Error::InvalidInput(format!(
                            "table {} is owned by {}",
                            name, owner.extension_id
                        )));
                    }
                    continue;
                }
                if existing.contains(name.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "table {} already exists in the host schema",
                        name
                    )));
                }
                let owner = TableOwner {
                    extension_id: extension_id.to_string(),
                    created_at: Utc::now().timestamp(),
                };
                let value = serde_json::to_vec(&owner)?;
                dict.insert(name.as_str(), value.as_slice())?;
                created.push(name.clone());
            }
        }
        write_txn.commit()?;

        if !created.is_empty() {
            debug!(extension_id = %extension_id, tables = ?created, "tables registered");
        }
        Ok(created)
    }

    /// Drop every table owned by the extension. Returns the dropped names.
    pub fn drop_owned(&self, extension_id: &str) -> Result<Vec<String>> {
        let owned = self.tables_owned_by(extension_id)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut dict = write_txn.open_table(DATA_DICTIONARY_TABLE)?;
            for name in &owned {
                dict.remove(name.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SchemaStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = SharedDb::open(dir.path().join("till.redb")).unwrap();
        (dir, SchemaStore::new(db))
    }

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_host_tables_are_introspectable() {
        let (_dir, store) = store();
        let names = store.table_names().unwrap();
        assert!(names.contains("extensions"));
        assert!(names.contains("permissions"));
        assert!(names.contains("roles"));
        assert!(names.contains("users"));
    }

    #[test]
    fn test_migrate_registers_and_is_idempotent() {
        let (_dir, store) = store();
        let created = store
            .migrate("loyalty", &tables(&["loyalty_account", "loyalty_event"]))
            .unwrap();
        assert_eq!(created.len(), 2);

        // Second run creates nothing.
        let created = store
            .migrate("loyalty", &tables(&["loyalty_account", "loyalty_event"]))
            .unwrap();
        assert!(created.is_empty());

        assert!(store.table_names().unwrap().contains("loyalty_account"));
        assert_eq!(
            store.owner_of("loyalty_account").unwrap().as_deref(),
            Some("loyalty")
        );
    }

    #[test]
    fn test_migrate_refuses_foreign_tables() {
        let (_dir, store) = store();
        store.migrate("loyalty", &tables(&["shared_counter"])).unwrap();
        let err = store
            .migrate("rewards", &tables(&["shared_counter"]))
            .unwrap_err();
        assert!(err.to_string().contains("loyalty"));
    }

    #[test]
    fn test_migrate_refuses_host_tables() {
        let (_dir, store) = store();
        let err = store.migrate("evil", &tables(&["extensions"])).unwrap_err();
        assert!(err.to_string().contains("extensions"));
    }

    #[test]
    fn test_drop_owned_scoped_to_extension() {
        let (_dir, store) = store();
        store.migrate("loyalty", &tables(&["loyalty_account"])).unwrap();
        store.migrate("sales", &tables(&["sales_order"])).unwrap();

        let dropped = store.drop_owned("loyalty").unwrap();
        assert_eq!(dropped, vec!["loyalty_account"]);
        assert!(!store.table_names().unwrap().contains("loyalty_account"));
        assert!(store.table_names().unwrap().contains("sales_order"));
    }
}
