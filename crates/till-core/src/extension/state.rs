//! Lifecycle state management.
//!
//! An extension's lifecycle state is derived exclusively from its directory
//! name under the extensions root: no prefix means active, a leading `_`
//! means inactive, a leading `.` means hidden (never scanned). Renaming the
//! directory is the only way to change state, and a change only takes effect
//! in the running process after a restart.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConflictKind, Error, Result};

/// Lifecycle state of an extension directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Loaded on the next host start.
    Active,
    /// Present on disk but skipped by the loader.
    Inactive,
    /// Never scanned. Also used for install staging.
    Hidden,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Hidden => write!(f, "hidden"),
        }
    }
}

/// Derive `(state, extension_id)` from a directory file name.
///
/// This is a pure function; it is the single definition of the naming
/// convention.
pub fn state_of_dir_name(name: &str) -> (LifecycleState, &str) {
    if let Some(id) = name.strip_prefix('.') {
        (LifecycleState::Hidden, id)
    } else if let Some(id) = name.strip_prefix('_') {
        (LifecycleState::Inactive, id)
    } else {
        (LifecycleState::Active, name)
    }
}

/// Directory file name for an extension id in a given state.
pub fn dir_name_for(id: &str, state: LifecycleState) -> String {
    match state {
        LifecycleState::Active => id.to_string(),
        LifecycleState::Inactive => format!("_{}", id),
        LifecycleState::Hidden => format!(".{}", id),
    }
}

/// One directory found under the extensions root.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub extension_id: String,
    pub state: LifecycleState,
    pub path: PathBuf,
}

/// Result of a state transition. Transitions never affect the running
/// process; callers must surface `restart_required` to the operator.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub extension_id: String,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub restart_required: bool,
}

/// Performs lifecycle transitions under one extensions root.
pub struct StateManager {
    root: PathBuf,
}

impl StateManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the directory holding `id`, in any state.
    pub fn dir_of(&self, id: &str) -> Option<(PathBuf, LifecycleState)> {
        for state in [
            LifecycleState::Active,
            LifecycleState::Inactive,
            LifecycleState::Hidden,
        ] {
            let path = self.root.join(dir_name_for(id, state));
            if path.is_dir() {
                return Some((path, state));
            }
        }
        None
    }

    /// Current state of `id`, if present on disk.
    pub fn state_of(&self, id: &str) -> Option<LifecycleState> {
        self.dir_of(id).map(|(_, state)| state)
    }

    /// List every extension directory under the root, hidden ones included.
    /// Entries are sorted by extension id.
    pub fn scan(&self) -> Result<Vec<ScanEntry>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let (state, id) = state_of_dir_name(name);
            if id.is_empty() {
                continue;
            }
            entries.push(ScanEntry {
                extension_id: id.to_string(),
                state,
                path: entry.path(),
            });
        }
        entries.sort_by(|a, b| a.extension_id.cmp(&b.extension_id));
        Ok(entries)
    }

    /// Rename `_<id>` to `<id>`. Takes effect on the next restart.
    pub fn activate(&self, id: &str) -> Result<StateTransition> {
        self.transition(id, LifecycleState::Inactive, LifecycleState::Active)
    }

    /// Rename `<id>` to `_<id>`. Takes effect on the next restart.
    pub fn deactivate(&self, id: &str) -> Result<StateTransition> {
        self.transition(id, LifecycleState::Active, LifecycleState::Inactive)
    }

    /// Remove whichever directory form of `id` exists.
    pub fn delete(&self, id: &str) -> Result<()> {
        let (path, state) = self
            .dir_of(id)
            .ok_or_else(|| Error::State(format!("extension {} not found on disk", id)))?;
        fs::remove_dir_all(&path)?;
        info!(extension_id = %id, state = %state, "extension directory removed");
        Ok(())
    }

    fn transition(
        &self,
        id: &str,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<StateTransition> {
        let source = self.root.join(dir_name_for(id, from));
        if !source.is_dir() {
            let found = self.state_of(id);
            return Err(match found {
                Some(state) => Error::State(format!(
                    "extension {} is {}, expected {}",
                    id, state, from
                )),
                None => Error::State(format!("extension {} not found on disk", id)),
            });
        }
        let target = self.root.join(dir_name_for(id, to));
        if target.exists() {
            return Err(Error::conflict(
                ConflictKind::Directory,
                dir_name_for(id, to),
            ));
        }
        fs::rename(&source, &target)?;
        info!(extension_id = %id, from = %from, to = %to, "lifecycle transition, restart required");
        Ok(StateTransition {
            extension_id: id.to_string(),
            from,
            to,
            restart_required: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, StateManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StateManager::new(dir.path());
        (dir, mgr)
    }

    #[test]
    fn test_state_is_pure_function_of_name() {
        assert_eq!(
            state_of_dir_name("loyalty"),
            (LifecycleState::Active, "loyalty")
        );
        assert_eq!(
            state_of_dir_name("_loyalty"),
            (LifecycleState::Inactive, "loyalty")
        );
        assert_eq!(
            state_of_dir_name(".loyalty"),
            (LifecycleState::Hidden, "loyalty")
        );
    }

    #[test]
    fn test_dir_name_roundtrip() {
        for state in [
            LifecycleState::Active,
            LifecycleState::Inactive,
            LifecycleState::Hidden,
        ] {
            let name = dir_name_for("pos-sync", state);
            assert_eq!(state_of_dir_name(&name), (state, "pos-sync"));
        }
    }

    #[test]
    fn test_activate_deactivate_roundtrip() {
        let (dir, mgr) = manager();
        fs::create_dir(dir.path().join("_loyalty")).unwrap();

        let t = mgr.activate("loyalty").unwrap();
        assert!(t.restart_required);
        assert_eq!(t.to, LifecycleState::Active);
        assert!(dir.path().join("loyalty").is_dir());
        assert!(!dir.path().join("_loyalty").exists());

        let t = mgr.deactivate("loyalty").unwrap();
        assert!(t.restart_required);
        assert!(dir.path().join("_loyalty").is_dir());
        assert_eq!(mgr.state_of("loyalty"), Some(LifecycleState::Inactive));
    }

    #[test]
    fn test_activate_fails_when_target_exists() {
        let (dir, mgr) = manager();
        fs::create_dir(dir.path().join("_loyalty")).unwrap();
        fs::create_dir(dir.path().join("loyalty")).unwrap();

        let err = mgr.activate("loyalty").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        // Nothing was renamed.
        assert!(dir.path().join("_loyalty").is_dir());
    }

    #[test]
    fn test_activate_missing_extension() {
        let (_dir, mgr) = manager();
        let err = mgr.activate("ghost").unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn test_delete_removes_any_form() {
        let (dir, mgr) = manager();
        fs::create_dir(dir.path().join("_loyalty")).unwrap();
        mgr.delete("loyalty").unwrap();
        assert!(!dir.path().join("_loyalty").exists());
    }

    #[test]
    fn test_scan_reports_all_states_sorted() {
        let (dir, mgr) = manager();
        fs::create_dir(dir.path().join("sales")).unwrap();
        fs::create_dir(dir.path().join("_loyalty")).unwrap();
        fs::create_dir(dir.path().join(".stage-notes")).unwrap();
        fs::write(dir.path().join("stray.txt"), "not a dir").unwrap();

        let entries = mgr.scan().unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.extension_id.as_str()).collect();
        assert_eq!(ids, vec!["loyalty", "sales", "stage-notes"]);
        assert_eq!(entries[0].state, LifecycleState::Inactive);
        assert_eq!(entries[1].state, LifecycleState::Active);
        assert_eq!(entries[2].state, LifecycleState::Hidden);
    }

    #[test]
    fn test_scan_empty_when_root_missing() {
        let mgr = StateManager::new("/nonexistent/till-extensions");
        assert!(mgr.scan().unwrap().is_empty());
    }
}
