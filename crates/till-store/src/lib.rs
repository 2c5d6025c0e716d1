//! Shared persistent store for the Till extension runtime.
//!
//! One redb database holds the host's extension records, the permission and
//! role store, and the schema data dictionary. Records are serialized with
//! serde_json so they stay inspectable with standard tooling.
//!
//! [`StoreBackend`] bundles the individual stores and implements the
//! backend traits `till-core` drives the install pipeline and startup
//! loader through.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use redb::Database;

pub mod backend;
pub mod error;
pub mod extensions;
pub mod permissions;
pub mod schema;

pub use backend::StoreBackend;
pub use error::{Error, Result};
pub use extensions::{ExtensionRecord, ExtensionStore, StoreStats};
pub use permissions::{
    expand_patterns, pattern_matches, PermissionRecord, PermissionStore, RoleGrant, RoleRecord,
    SyncOutcome, UserRecord,
};
pub use schema::SchemaStore;

/// Singleton slot for the shared database handle.
static SHARED_DB_SINGLETON: StdMutex<Option<Arc<SharedDb>>> = StdMutex::new(None);

/// Process-wide handle to the shared database.
pub struct SharedDb {
    db: Database,
    path: String,
}

impl SharedDb {
    /// Open (or create) the shared database at `path`.
    ///
    /// Handles are cached per path so repeated opens within the process
    /// share one database lock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy().to_string();

        {
            let singleton = SHARED_DB_SINGLETON.lock().unwrap();
            if let Some(shared) = singleton.as_ref() {
                if shared.path == path_str {
                    return Ok(shared.clone());
                }
            }
        }

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        let shared = Arc::new(SharedDb { db, path: path_str });
        shared.ensure_tables()?;

        *SHARED_DB_SINGLETON.lock().unwrap() = Some(shared.clone());
        Ok(shared)
    }

    /// Create every host table so read transactions never race table
    /// creation.
    fn ensure_tables(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(extensions::EXTENSIONS_TABLE)?;
            let _ = write_txn.open_table(permissions::PERMISSIONS_TABLE)?;
            let _ = write_txn.open_table(permissions::ROLES_TABLE)?;
            let _ = write_txn.open_table(permissions::USERS_TABLE)?;
            let _ = write_txn.open_table(schema::DATA_DICTIONARY_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub(crate) fn begin_read(&self) -> Result<redb::ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    pub(crate) fn begin_write(&self) -> Result<redb::WriteTransaction> {
        Ok(self.db.begin_write()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_idempotent_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("till.redb");
        let a = SharedDb::open(&path).unwrap();
        let b = SharedDb::open(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("till.redb");
        SharedDb::open(&path).unwrap();
        assert!(path.exists());
    }
}
