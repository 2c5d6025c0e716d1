//! Permission, role, and user storage.
//!
//! Permissions are materialized from extension manifests, never created by
//! end users: each declared action becomes a `"{extension_id}.{action}"`
//! codename. Roles hold grants that are either a direct codename or a
//! wildcard pattern, and a role's effective set is computed on demand by
//! expanding every wildcard against the live permission table. Nothing
//! derived is persisted, so a newly synced permission is immediately
//! visible through every matching wildcard.

use std::collections::BTreeSet;
use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::SharedDb;

// Permissions table: key = codename, value = PermissionRecord (serialized)
pub(crate) const PERMISSIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("permissions");
// Roles table: key = role name, value = RoleRecord (serialized)
pub(crate) const ROLES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("roles");
// Users table: key = username, value = UserRecord (serialized)
pub(crate) const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// A stored permission, owned by the extension that declared it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// `"{extension_id}.{action}"`, unique within the host.
    pub codename: String,
    /// Human-readable name.
    pub name: String,
    /// Owning extension.
    pub extension_id: String,
}

/// One grant held by a role: a direct permission reference or a wildcard
/// pattern, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleGrant {
    /// Reference to one permission codename.
    Direct(String),
    /// Pattern expanded against all known codenames, e.g. `"inventory.*"`.
    Wildcard(String),
}

/// A stored role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: String,
    pub display_name: String,
    /// System roles cannot be deleted.
    #[serde(default)]
    pub is_system: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub grants: Vec<RoleGrant>,
}

fn default_true() -> bool {
    true
}

/// A stored user: one role plus optional extra individual permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub extra_permissions: Vec<String>,
}

/// Counts from one permission sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Match one wildcard pattern against a codename.
///
/// `"*"` matches everything; a trailing `*` matches by prefix
/// (`"inventory.*"`, `"inventory.report_*"`); anything else matches
/// exactly.
pub fn pattern_matches(pattern: &str, codename: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => codename.starts_with(prefix),
        None => codename == pattern,
    }
}

/// Expand a grant set against all known codenames.
///
/// Pure function over two sets; recomputed on demand so it always reflects
/// the live permission table.
pub fn expand_patterns(grants: &[RoleGrant], all_codenames: &BTreeSet<String>) -> BTreeSet<String> {
    let mut expanded = BTreeSet::new();
    for grant in grants {
        match grant {
            RoleGrant::Direct(codename) => {
                expanded.insert(codename.clone());
            }
            RoleGrant::Wildcard(pattern) => {
                for codename in all_codenames {
                    if pattern_matches(pattern, codename) {
                        expanded.insert(codename.clone());
                    }
                }
            }
        }
    }
    expanded
}

/// Permission, role, and user storage.
pub struct PermissionStore {
    db: Arc<SharedDb>,
}

impl PermissionStore {
    pub fn new(db: Arc<SharedDb>) -> Self {
        Self { db }
    }

    /// Materialize an extension's declared permissions.
    ///
    /// Upserts each `(codename, name)` pair and prunes permissions the
    /// extension no longer declares. Idempotent: running twice with the
    /// same declarations writes nothing the second time.
    pub fn sync_extension(
        &self,
        extension_id: &str,
        declared: &[(String, String)],
    ) -> Result<SyncOutcome> {
        let existing = self.permissions_for(extension_id)?;
        let mut outcome = SyncOutcome::default();

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PERMISSIONS_TABLE)?;

            let declared_codenames: BTreeSet<&str> =
                declared.iter().map(|(codename, _)| codename.as_str()).collect();
            for record in &existing {
                if !declared_codenames.contains(record.codename.as_str()) {
                    table.remove(record.codename.as_str())?;
                    outcome.removed += 1;
                }
            }

            for (codename, name) in declared {
                let current = existing.iter().find(|r| &r.codename == codename);
                match current {
                    Some(record) if &record.name == name => {
                        outcome.unchanged += 1;
                        continue;
                    }
                    Some(_) => outcome.updated += 1,
                    None => outcome.created += 1,
                }
                let record = PermissionRecord {
                    codename: codename.clone(),
                    name: name.clone(),
                    extension_id: extension_id.to_string(),
                };
                let value = serde_json::to_vec(&record)?;
                table.insert(codename.as_str(), value.as_slice())?;
            }
        }
        write_txn.commit()?;

        debug!(
            extension_id = %extension_id,
            created = outcome.created,
            updated = outcome.updated,
            removed = outcome.removed,
            "permission sync"
        );
        Ok(outcome)
    }

    /// All permission codenames.
    pub fn all_codenames(&self) -> Result<BTreeSet<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PERMISSIONS_TABLE)?;
        let mut codenames = BTreeSet::new();
        for result in table.iter()? {
            let (key, _) = result?;
            codenames.insert(key.value().to_string());
        }
        Ok(codenames)
    }

    /// Permissions owned by one extension.
    pub fn permissions_for(&self, extension_id: &str) -> Result<Vec<PermissionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PERMISSIONS_TABLE)?;
        let mut records = Vec::new();
        for result in table.iter()? {
            let (_, data) = result?;
            let record: PermissionRecord = serde_json::from_slice(data.value())?;
            if record.extension_id == extension_id {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Save a role.
    pub fn save_role(&self, role: &RoleRecord) -> Result<()> {
        if role.name.is_empty() {
            return Err(Error::InvalidInput("role name cannot be empty".into()));
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ROLES_TABLE)?;
            let value = serde_json::to_vec(role)?;
            table.insert(role.name.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a role by name.
    pub fn load_role(&self, name: &str) -> Result<Option<RoleRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ROLES_TABLE)?;
        if let Some(data) = table.get(name)? {
            Ok(Some(serde_json::from_slice(data.value())?))
        } else {
            Ok(None)
        }
    }

    /// Delete a role. System roles are protected.
    pub fn delete_role(&self, name: &str) -> Result<bool> {
        let Some(role) = self.load_role(name)? else {
            return Ok(false);
        };
        if role.is_system {
            return Err(Error::InvalidInput(format!(
                "role {} is a system role and cannot be deleted",
                name
            )));
        }
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(ROLES_TABLE)?;
            let removed = table.remove(name)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Save a user.
    pub fn save_user(&self, user: &UserRecord) -> Result<()> {
        if user.username.is_empty() {
            return Err(Error::InvalidInput("username cannot be empty".into()));
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS_TABLE)?;
            let value = serde_json::to_vec(user)?;
            table.insert(user.username.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a user by name.
    pub fn load_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        if let Some(data) = table.get(username)? {
            Ok(Some(serde_json::from_slice(data.value())?))
        } else {
            Ok(None)
        }
    }

    /// A role's effective permission set: direct grants plus the expansion
    /// of every wildcard against the live permission table.
    pub fn expand_role(&self, role: &RoleRecord) -> Result<BTreeSet<String>> {
        let all = self.all_codenames()?;
        Ok(expand_patterns(&role.grants, &all))
    }

    /// A user's effective permissions: the role's expanded set (inactive
    /// roles contribute nothing) plus the user's extra permissions.
    pub fn effective_permissions(&self, user: &UserRecord) -> Result<BTreeSet<String>> {
        let mut effective = BTreeSet::new();
        if let Some(role_name) = &user.role {
            if let Some(role) = self.load_role(role_name)? {
                if role.is_active {
                    effective.extend(self.expand_role(&role)?);
                }
            }
        }
        effective.extend(user.extra_permissions.iter().cloned());
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, PermissionStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = SharedDb::open(dir.path().join("till.redb")).unwrap();
        (dir, PermissionStore::new(db))
    }

    fn declared(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(c, n)| (c.to_string(), n.to_string()))
            .collect()
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "inventory.view"));
        assert!(pattern_matches("inventory.*", "inventory.view"));
        assert!(pattern_matches("inventory.report_*", "inventory.report_daily"));
        assert!(pattern_matches("inventory.view", "inventory.view"));
        assert!(!pattern_matches("inventory.*", "sales.view"));
        assert!(!pattern_matches("inventory.report_*", "inventory.view"));
        assert!(!pattern_matches("inventory.view", "inventory.edit"));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let (_dir, store) = store();
        let decls = declared(&[
            ("loyalty.view", "View loyalty"),
            ("loyalty.redeem", "Redeem points"),
        ]);

        let first = store.sync_extension("loyalty", &decls).unwrap();
        assert_eq!(first.created, 2);

        let second = store.sync_extension("loyalty", &decls).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.removed, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(store.all_codenames().unwrap().len(), 2);
    }

    #[test]
    fn test_sync_updates_renamed_and_prunes_dropped() {
        let (_dir, store) = store();
        store
            .sync_extension(
                "loyalty",
                &declared(&[("loyalty.view", "View"), ("loyalty.redeem", "Redeem")]),
            )
            .unwrap();

        let outcome = store
            .sync_extension("loyalty", &declared(&[("loyalty.view", "View accounts")]))
            .unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.removed, 1);

        let remaining = store.permissions_for("loyalty").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "View accounts");
    }

    #[test]
    fn test_sync_scoped_to_extension() {
        let (_dir, store) = store();
        store
            .sync_extension("loyalty", &declared(&[("loyalty.view", "View")]))
            .unwrap();
        store
            .sync_extension("sales", &declared(&[("sales.view", "View sales")]))
            .unwrap();

        // Re-syncing loyalty must not touch sales.
        store.sync_extension("loyalty", &declared(&[])).unwrap();
        assert_eq!(store.permissions_for("sales").unwrap().len(), 1);
        assert!(store.permissions_for("loyalty").unwrap().is_empty());
    }

    #[test]
    fn test_wildcard_expansion_is_monotonic() {
        let (_dir, store) = store();
        store
            .sync_extension("inventory", &declared(&[("inventory.view", "View")]))
            .unwrap();

        let role = RoleRecord {
            name: "manager".into(),
            display_name: "Manager".into(),
            is_system: false,
            is_active: true,
            grants: vec![RoleGrant::Wildcard("inventory.*".into())],
        };
        store.save_role(&role).unwrap();
        assert_eq!(store.expand_role(&role).unwrap().len(), 1);

        // A new matching permission is granted without touching the role.
        store
            .sync_extension(
                "inventory",
                &declared(&[("inventory.view", "View"), ("inventory.adjust", "Adjust")]),
            )
            .unwrap();
        let expanded = store.expand_role(&role).unwrap();
        assert_eq!(expanded.len(), 2);
        assert!(expanded.contains("inventory.adjust"));

        let stored = store.load_role("manager").unwrap().unwrap();
        assert_eq!(stored.grants, role.grants);
    }

    #[test]
    fn test_star_grants_everything() {
        let (_dir, store) = store();
        store
            .sync_extension("loyalty", &declared(&[("loyalty.view", "View")]))
            .unwrap();
        store
            .sync_extension("sales", &declared(&[("sales.view", "View")]))
            .unwrap();

        let admin = RoleRecord {
            name: "admin".into(),
            display_name: "Administrator".into(),
            is_system: true,
            is_active: true,
            grants: vec![RoleGrant::Wildcard("*".into())],
        };
        assert_eq!(store.expand_role(&admin).unwrap().len(), 2);
    }

    #[test]
    fn test_direct_and_wildcard_union() {
        let (_dir, store) = store();
        store
            .sync_extension(
                "inventory",
                &declared(&[("inventory.view", "V"), ("inventory.adjust", "A")]),
            )
            .unwrap();
        store
            .sync_extension("sales", &declared(&[("sales.refund", "R")]))
            .unwrap();

        let role = RoleRecord {
            name: "clerk".into(),
            display_name: "Clerk".into(),
            is_system: false,
            is_active: true,
            grants: vec![
                RoleGrant::Wildcard("inventory.*".into()),
                RoleGrant::Direct("sales.refund".into()),
            ],
        };
        let expanded = store.expand_role(&role).unwrap();
        assert_eq!(expanded.len(), 3);
    }

    #[test]
    fn test_system_role_cannot_be_deleted() {
        let (_dir, store) = store();
        let admin = RoleRecord {
            name: "admin".into(),
            display_name: "Administrator".into(),
            is_system: true,
            is_active: true,
            grants: vec![],
        };
        store.save_role(&admin).unwrap();
        assert!(store.delete_role("admin").is_err());

        let clerk = RoleRecord {
            name: "clerk".into(),
            display_name: "Clerk".into(),
            is_system: false,
            is_active: true,
            grants: vec![],
        };
        store.save_role(&clerk).unwrap();
        assert!(store.delete_role("clerk").unwrap());
    }

    #[test]
    fn test_effective_permissions_union_role_and_extras() {
        let (_dir, store) = store();
        store
            .sync_extension("inventory", &declared(&[("inventory.view", "V")]))
            .unwrap();
        store
            .sync_extension("sales", &declared(&[("sales.refund", "R")]))
            .unwrap();

        let role = RoleRecord {
            name: "clerk".into(),
            display_name: "Clerk".into(),
            is_system: false,
            is_active: true,
            grants: vec![RoleGrant::Wildcard("inventory.*".into())],
        };
        store.save_role(&role).unwrap();

        let user = UserRecord {
            username: "dana".into(),
            role: Some("clerk".into()),
            extra_permissions: vec!["sales.refund".into()],
        };
        store.save_user(&user).unwrap();

        let effective = store.effective_permissions(&user).unwrap();
        assert!(effective.contains("inventory.view"));
        assert!(effective.contains("sales.refund"));
        assert_eq!(effective.len(), 2);
    }

    #[test]
    fn test_inactive_role_contributes_nothing() {
        let (_dir, store) = store();
        store
            .sync_extension("inventory", &declared(&[("inventory.view", "V")]))
            .unwrap();
        let role = RoleRecord {
            name: "clerk".into(),
            display_name: "Clerk".into(),
            is_system: false,
            is_active: false,
            grants: vec![RoleGrant::Wildcard("*".into())],
        };
        store.save_role(&role).unwrap();

        let user = UserRecord {
            username: "dana".into(),
            role: Some("clerk".into()),
            extra_permissions: vec![],
        };
        assert!(store.effective_permissions(&user).unwrap().is_empty());
    }
}
