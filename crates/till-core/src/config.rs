//! Host configuration and well-known paths.

use std::path::PathBuf;

/// Host version, used for extension compatibility checks.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default extensions root, relative to the working directory.
pub const DEFAULT_EXTENSIONS_ROOT: &str = "extensions";

/// File name of the shared store inside the extensions root.
pub const STORE_FILE_NAME: &str = "till.redb";

/// Environment variable names understood by the host.
pub mod env_vars {
    pub const EXTENSIONS_ROOT: &str = "TILL_EXTENSIONS_ROOT";
    pub const STORE_PATH: &str = "TILL_STORE_PATH";
    pub const ENTITLEMENT_ENDPOINT: &str = "TILL_ENTITLEMENT_ENDPOINT";
    pub const LOG_JSON: &str = "TILL_LOG_JSON";
    pub const AUTHOR: &str = "TILL_AUTHOR";
}

/// Parsed host version.
pub fn host_version() -> semver::Version {
    // The crate version is set by cargo and always parses.
    semver::Version::parse(HOST_VERSION).expect("crate version is valid semver")
}

/// Resolved host configuration.
///
/// Precedence: explicit value, then environment variable, then default.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Directory scanned for extension directories.
    pub extensions_root: PathBuf,
    /// Path of the shared redb store.
    pub store_path: PathBuf,
    /// Base URL of the remote entitlement service, if configured.
    pub entitlement_endpoint: Option<String>,
}

impl HostConfig {
    /// Resolve configuration from optional explicit values and the environment.
    pub fn resolve(root: Option<PathBuf>, store: Option<PathBuf>) -> Self {
        let extensions_root = root
            .or_else(|| std::env::var_os(env_vars::EXTENSIONS_ROOT).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXTENSIONS_ROOT));

        let store_path = store
            .or_else(|| std::env::var_os(env_vars::STORE_PATH).map(PathBuf::from))
            .unwrap_or_else(|| extensions_root.join(STORE_FILE_NAME));

        let entitlement_endpoint = std::env::var(env_vars::ENTITLEMENT_ENDPOINT).ok();

        Self {
            extensions_root,
            store_path,
            entitlement_endpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_version_parses() {
        let v = host_version();
        assert!(v.major > 0 || v.minor > 0);
    }

    #[test]
    fn test_resolve_explicit_values_win() {
        let cfg = HostConfig::resolve(
            Some(PathBuf::from("/tmp/exts")),
            Some(PathBuf::from("/tmp/state.redb")),
        );
        assert_eq!(cfg.extensions_root, PathBuf::from("/tmp/exts"));
        assert_eq!(cfg.store_path, PathBuf::from("/tmp/state.redb"));
    }

    #[test]
    fn test_store_defaults_under_root() {
        let cfg = HostConfig::resolve(Some(PathBuf::from("/srv/till/extensions")), None);
        assert_eq!(
            cfg.store_path,
            PathBuf::from("/srv/till/extensions").join(STORE_FILE_NAME)
        );
    }
}
