//! Error types for the extension runtime.

use thiserror::Error;

/// Result type for extension runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What kind of identifier collided during conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A storage table name already present in the live schema.
    Table,
    /// A namespace label already registered by another extension.
    Namespace,
    /// An entity name already registered by another extension.
    Entity,
    /// A directory name already occupied under the extensions root.
    Directory,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Namespace => write!(f, "namespace"),
            Self::Entity => write!(f, "entity"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// Extension runtime errors.
///
/// The variants map onto the operator-facing exit codes via
/// [`Error::exit_code`]: validation failures exit 1, conflicts exit 2,
/// everything else exits 3.
#[derive(Debug, Error)]
pub enum Error {
    /// Manifest or package validation failure.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A declared dependency is not on the host allow-list.
    #[error("disallowed dependency: {0}")]
    DisallowedDependency(String),

    /// Schema or namespace collision. Always names the colliding identifier.
    #[error("{kind} conflict: {identifier}")]
    Conflict {
        kind: ConflictKind,
        identifier: String,
    },

    /// Schema migration failure. The extension stays staged for inspection.
    #[error("migration failed for {extension_id}: {reason}")]
    Migration {
        extension_id: String,
        reason: String,
    },

    /// A single extension failed to register at startup.
    #[error("failed to load {extension_id}: {reason}")]
    Load {
        extension_id: String,
        reason: String,
    },

    /// Entitlement verification failure.
    #[error("subscription check failed: {0}")]
    Subscription(String),

    /// Operation not valid for the extension's current lifecycle state.
    #[error("invalid state: {0}")]
    State(String),

    /// Persistent store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Archive read/write failure.
    #[error("archive error: {0}")]
    Archive(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a conflict error.
    pub fn conflict(kind: ConflictKind, identifier: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Process exit code for the CLI: 0 success, 1 validation failure,
    /// 2 conflict failure, 3 everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::DisallowedDependency(_) => 1,
            Self::Conflict { .. } => 2,
            _ => 3,
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Archive(e.to_string())
    }
}

impl From<semver::Error> for Error {
    fn from(e: semver::Error) -> Self {
        Error::Validation(format!("invalid version: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Validation("x".into()).exit_code(), 1);
        assert_eq!(Error::DisallowedDependency("x".into()).exit_code(), 1);
        assert_eq!(Error::conflict(ConflictKind::Table, "t").exit_code(), 2);
        assert_eq!(Error::Storage("x".into()).exit_code(), 3);
        assert_eq!(
            Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).exit_code(),
            3
        );
    }

    #[test]
    fn test_conflict_names_identifier() {
        let err = Error::conflict(ConflictKind::Table, "loyalty_point");
        assert!(err.to_string().contains("loyalty_point"));
        assert!(err.to_string().contains("table"));
    }
}
