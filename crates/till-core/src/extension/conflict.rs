//! Schema and namespace conflict detection.
//!
//! Before anything is written, an extension's declared schema block is
//! compared against the live store: existing table names, and the namespace
//! and entity labels registered by other extensions. Any intersection aborts
//! the install with an error naming the exact colliding identifier.
//!
//! Detection is declarative: the manifest's schema block is authoritative.
//! A best-effort scan of source and migration files also runs, flagging
//! table-like identifiers the manifest does not declare. Identifiers an
//! extension constructs dynamically at runtime are invisible to that scan;
//! this is a known limitation, not a guarantee the detector can make.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ConflictKind, Error, Result};
use crate::extension::manifest::ExtensionManifest;

/// Snapshot of the live schema an install is checked against.
#[derive(Debug, Clone, Default)]
pub struct LiveSchema {
    /// Every table name in the shared store, host tables included.
    pub tables: BTreeSet<String>,
    /// Namespace labels registered by installed extensions.
    pub namespaces: BTreeSet<String>,
    /// Entity names registered by installed extensions.
    pub entities: BTreeSet<String>,
}

/// Check the manifest's declared schema against the live schema.
///
/// Fails on the first collision. Callers validating an already-installed
/// extension must exclude that extension's own registrations from `live`
/// first.
pub fn detect_conflicts(manifest: &ExtensionManifest, live: &LiveSchema) -> Result<()> {
    for table in &manifest.schema.tables {
        if live.tables.contains(table) {
            return Err(Error::conflict(ConflictKind::Table, table.clone()));
        }
    }
    let namespace = manifest.namespace();
    if live.namespaces.contains(namespace) {
        return Err(Error::conflict(ConflictKind::Namespace, namespace));
    }
    for entity in &manifest.schema.entities {
        if live.entities.contains(entity) {
            return Err(Error::conflict(ConflictKind::Entity, entity.clone()));
        }
    }
    Ok(())
}

/// A table-like identifier found in source but missing from the manifest.
#[derive(Debug, Clone)]
pub struct UndeclaredTable {
    pub file: PathBuf,
    pub table: String,
}

/// Scan source and migration files for table identifiers not declared in
/// the manifest's schema block.
///
/// Advisory only. Recognizes `CREATE TABLE <name>` in migration scripts and
/// `TableDefinition::new("<name>")` in source.
pub fn scan_undeclared_tables(
    dir: &Path,
    manifest: &ExtensionManifest,
) -> Result<Vec<UndeclaredTable>> {
    let declared: BTreeSet<&str> = manifest.schema.tables.iter().map(String::as_str).collect();
    let mut found = Vec::new();
    for sub in ["src", "migrations"] {
        let tree = dir.join(sub);
        if tree.is_dir() {
            scan_tree(&tree, &declared, &mut found)?;
        }
    }
    for u in &found {
        warn!(
            file = %u.file.display(),
            table = %u.table,
            "table referenced in source but not declared in manifest schema"
        );
    }
    Ok(found)
}

fn scan_tree(dir: &Path, declared: &BTreeSet<&str>, found: &mut Vec<UndeclaredTable>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_tree(&path, declared, found)?;
            continue;
        }
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        for table in extract_table_names(&text) {
            if !declared.contains(table.as_str()) {
                found.push(UndeclaredTable {
                    file: path.clone(),
                    table,
                });
            }
        }
    }
    Ok(())
}

/// Pull table identifiers out of one file's text.
fn extract_table_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for marker in ["CREATE TABLE ", "create table "] {
        let mut cursor = 0;
        while let Some(at) = text[cursor..].find(marker) {
            let start = cursor + at + marker.len();
            let rest = text[start..]
                .trim_start_matches("IF NOT EXISTS ")
                .trim_start_matches("if not exists ");
            if let Some(name) = leading_identifier(rest) {
                names.push(name);
            }
            cursor = start;
        }
    }
    let mut cursor = 0;
    while let Some(at) = text[cursor..].find("TableDefinition::new(\"") {
        let start = cursor + at + "TableDefinition::new(\"".len();
        if let Some(end) = text[start..].find('"') {
            names.push(text[start..start + end].to_string());
        }
        cursor = start;
    }
    names
}

fn leading_identifier(text: &str) -> Option<String> {
    let name: String = text
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::manifest::SchemaDecl;

    fn manifest_with_schema(tables: &[&str], namespace: &str, entities: &[&str]) -> ExtensionManifest {
        let mut m = ExtensionManifest::from_json(
            r#"{"id": "loyalty", "name": "Loyalty", "version": "1.0.0", "author": "Acme"}"#,
        )
        .unwrap();
        m.schema = SchemaDecl {
            namespace: namespace.to_string(),
            tables: tables.iter().map(|s| s.to_string()).collect(),
            entities: entities.iter().map(|s| s.to_string()).collect(),
        };
        m
    }

    fn live(tables: &[&str], namespaces: &[&str], entities: &[&str]) -> LiveSchema {
        LiveSchema {
            tables: tables.iter().map(|s| s.to_string()).collect(),
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            entities: entities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_table_collision_names_identifier() {
        let m = manifest_with_schema(&["loyalty_account"], "loyalty", &[]);
        let l = live(&["loyalty_account"], &[], &[]);
        let err = detect_conflicts(&m, &l).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("loyalty_account"));
    }

    #[test]
    fn test_namespace_collision() {
        let m = manifest_with_schema(&[], "loyalty", &[]);
        let l = live(&[], &["loyalty"], &[]);
        let err = detect_conflicts(&m, &l).unwrap_err();
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn test_namespace_defaults_to_id() {
        let m = manifest_with_schema(&[], "", &[]);
        let l = live(&[], &["loyalty"], &[]);
        assert!(detect_conflicts(&m, &l).is_err());
    }

    #[test]
    fn test_entity_collision() {
        let m = manifest_with_schema(&[], "loyalty", &["Account"]);
        let l = live(&[], &[], &["Account"]);
        let err = detect_conflicts(&m, &l).unwrap_err();
        assert!(err.to_string().contains("Account"));
    }

    #[test]
    fn test_clean_manifest_passes() {
        let m = manifest_with_schema(&["loyalty_account"], "loyalty", &["Account"]);
        let l = live(&["sales_order"], &["sales"], &["Order"]);
        detect_conflicts(&m, &l).unwrap();
    }

    #[test]
    fn test_extract_table_names() {
        let sql = "CREATE TABLE loyalty_event (\n id INTEGER\n);\ncreate table  x";
        let names = extract_table_names(sql);
        assert!(names.contains(&"loyalty_event".to_string()));

        let rust = r#"const T: TableDefinition<&str, &[u8]> = TableDefinition::new("loyalty_account");"#;
        assert_eq!(extract_table_names(rust), vec!["loyalty_account"]);
    }

    #[test]
    fn test_scan_reports_undeclared_only() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("migrations");
        fs::create_dir_all(&migrations).unwrap();
        fs::write(
            migrations.join("0001_init.sql"),
            "CREATE TABLE loyalty_account (id INTEGER);\nCREATE TABLE loyalty_audit (id INTEGER);\n",
        )
        .unwrap();

        let m = manifest_with_schema(&["loyalty_account"], "loyalty", &[]);
        let found = scan_undeclared_tables(dir.path(), &m).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].table, "loyalty_audit");
    }
}
