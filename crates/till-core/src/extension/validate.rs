//! Manifest and package validation.
//!
//! Validation gates the install pipeline: required manifest fields, the
//! third-party dependency allow-list, availability of each dependency in the
//! host's pre-bundled set, and host version compatibility are hard failures.
//! The source scan for high-risk call patterns is a heuristic only; it
//! produces warnings for the operator and never blocks an install.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config;
use crate::error::{Error, Result};
use crate::extension::manifest::{is_valid_extension_id, ExtensionManifest};

/// Third-party packages extensions may declare as dependencies.
///
/// Curated; spans imaging, documents, serialization, cryptography, HTTP,
/// and data analysis. Anything else is rejected outright.
pub const DEPENDENCY_ALLOW_LIST: &[&str] = &[
    // Imaging
    "image",
    "imageproc",
    "resvg",
    "qrcode",
    // Documents
    "printpdf",
    "lopdf",
    "calamine",
    "rust_xlsxwriter",
    "csv",
    "quick-xml",
    "pulldown-cmark",
    // Serialization
    "serde",
    "serde_json",
    "toml",
    // Cryptography
    "sha2",
    "hmac",
    "aes-gcm",
    "argon2",
    "base64",
    // HTTP
    "reqwest",
    "url",
    // Data analysis
    "polars",
    "ndarray",
    "rust_decimal",
    "chrono",
];

/// Versions of the allow-listed packages bundled with the host.
///
/// The host environment is closed: dependencies are never fetched at install
/// time, so a declared requirement must match one of these.
pub const BUNDLED_PACKAGES: &[(&str, &str)] = &[
    ("image", "0.25.2"),
    ("imageproc", "0.25.0"),
    ("resvg", "0.44.0"),
    ("qrcode", "0.14.1"),
    ("printpdf", "0.7.0"),
    ("lopdf", "0.34.0"),
    ("calamine", "0.26.1"),
    ("rust_xlsxwriter", "0.79.0"),
    ("csv", "1.3.1"),
    ("quick-xml", "0.37.1"),
    ("pulldown-cmark", "0.12.2"),
    ("serde", "1.0.210"),
    ("serde_json", "1.0.128"),
    ("toml", "0.8.19"),
    ("sha2", "0.10.8"),
    ("hmac", "0.12.1"),
    ("aes-gcm", "0.10.3"),
    ("argon2", "0.5.3"),
    ("base64", "0.22.1"),
    ("reqwest", "0.12.9"),
    ("url", "2.5.4"),
    ("polars", "0.44.2"),
    ("ndarray", "0.16.1"),
    ("rust_decimal", "1.36.0"),
    ("chrono", "0.4.38"),
];

/// High-risk call patterns flagged by the source scan.
const RISK_PATTERNS: &[(&str, &str)] = &[
    ("process::Command", "spawns external processes"),
    ("os.system(", "spawns a shell"),
    ("subprocess.", "spawns external processes"),
    ("eval(", "evaluates dynamic code"),
    ("exec(", "evaluates dynamic code"),
    ("__import__(", "imports code dynamically"),
];

/// A non-fatal security finding from the source scan.
#[derive(Debug, Clone)]
pub struct SecurityWarning {
    pub file: PathBuf,
    pub line: usize,
    pub pattern: String,
    pub note: String,
}

impl std::fmt::Display for SecurityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: `{}` {}",
            self.file.display(),
            self.line,
            self.pattern,
            self.note
        )
    }
}

/// Outcome of a successful validation: hard checks passed, warnings noted.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub warnings: Vec<SecurityWarning>,
}

/// Check the manifest's required fields and id shape.
pub fn check_manifest_fields(manifest: &ExtensionManifest) -> Result<()> {
    if manifest.id.is_empty() {
        return Err(Error::Validation("extension id cannot be empty".into()));
    }
    if !is_valid_extension_id(&manifest.id) {
        return Err(Error::Validation(format!(
            "invalid extension id {:?}: expected lowercase alphanumeric with '-' or '_'",
            manifest.id
        )));
    }
    if manifest.name.is_empty() {
        return Err(Error::Validation("extension name cannot be empty".into()));
    }
    if manifest.author.is_empty() {
        return Err(Error::Validation("extension author cannot be empty".into()));
    }
    for perm in &manifest.permissions {
        if perm.action.is_empty() {
            return Err(Error::Validation(format!(
                "extension {} declares a permission with an empty action",
                manifest.id
            )));
        }
    }
    for table in &manifest.schema.tables {
        if table.is_empty() {
            return Err(Error::Validation(format!(
                "extension {} declares an empty table name",
                manifest.id
            )));
        }
    }
    Ok(())
}

/// Reject any declared dependency whose package is not on the allow-list.
pub fn check_dependency_allow_list(manifest: &ExtensionManifest) -> Result<()> {
    for dep in &manifest.dependencies {
        if !DEPENDENCY_ALLOW_LIST.contains(&dep.package.as_str()) {
            return Err(Error::DisallowedDependency(format!(
                "{} (declared by {})",
                dep.package, manifest.id
            )));
        }
    }
    Ok(())
}

/// Verify each declared dependency is satisfied by the host's bundled set.
///
/// The host never installs packages at runtime; a requirement that the
/// bundled version cannot satisfy fails the install.
pub fn check_bundled_availability(manifest: &ExtensionManifest) -> Result<()> {
    for dep in &manifest.dependencies {
        let bundled = BUNDLED_PACKAGES
            .iter()
            .find(|(name, _)| *name == dep.package.as_str());
        let Some((_, bundled_version)) = bundled else {
            return Err(Error::DisallowedDependency(format!(
                "{} (declared by {})",
                dep.package, manifest.id
            )));
        };
        let bundled_version = semver::Version::parse(bundled_version)?;
        if !dep.version.matches(&bundled_version) {
            return Err(Error::Validation(format!(
                "dependency {} requires {} but the host bundles {}",
                dep.package, dep.version, bundled_version
            )));
        }
    }
    Ok(())
}

/// Check the declared minimum host version against this host.
pub fn check_host_compatibility(manifest: &ExtensionManifest) -> Result<()> {
    if let Some(req) = &manifest.min_host_version {
        let host = config::host_version();
        if !req.matches(&host) {
            return Err(Error::Validation(format!(
                "extension {} requires host {} but this host is {}",
                manifest.id, req, host
            )));
        }
    }
    Ok(())
}

/// Scan source files under `src/` for high-risk call patterns.
///
/// Heuristic, not a sandbox: findings are warnings, binary or non-UTF-8
/// files are skipped, and a clean scan proves nothing.
pub fn scan_sources(dir: &Path) -> Result<Vec<SecurityWarning>> {
    let mut warnings = Vec::new();
    let src = dir.join("src");
    if src.is_dir() {
        scan_tree(&src, &mut warnings)?;
    }
    for w in &warnings {
        warn!(file = %w.file.display(), line = w.line, pattern = %w.pattern, "risky call pattern in extension source");
    }
    Ok(warnings)
}

fn scan_tree(dir: &Path, warnings: &mut Vec<SecurityWarning>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_tree(&path, warnings)?;
            continue;
        }
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        for (number, line) in text.lines().enumerate() {
            for (pattern, note) in RISK_PATTERNS {
                if line.contains(pattern) {
                    warnings.push(SecurityWarning {
                        file: path.clone(),
                        line: number + 1,
                        pattern: (*pattern).to_string(),
                        note: (*note).to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Run every validation over an extracted extension directory.
///
/// Hard failures short-circuit; the source scan runs last and only adds
/// warnings to the report.
pub fn validate_extension(dir: &Path, manifest: &ExtensionManifest) -> Result<ValidationReport> {
    check_manifest_fields(manifest)?;
    check_dependency_allow_list(manifest)?;
    check_host_compatibility(manifest)?;
    let warnings = scan_sources(dir)?;
    Ok(ValidationReport { warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> ExtensionManifest {
        ExtensionManifest::from_json(json).unwrap()
    }

    fn base() -> ExtensionManifest {
        manifest(r#"{"id": "loyalty", "name": "Loyalty", "version": "1.0.0", "author": "Acme"}"#)
    }

    #[test]
    fn test_allow_list_has_curated_size() {
        assert_eq!(DEPENDENCY_ALLOW_LIST.len(), 25);
        assert_eq!(BUNDLED_PACKAGES.len(), DEPENDENCY_ALLOW_LIST.len());
        for (name, version) in BUNDLED_PACKAGES {
            assert!(DEPENDENCY_ALLOW_LIST.contains(name));
            assert!(semver::Version::parse(version).is_ok());
        }
    }

    #[test]
    fn test_disallowed_dependency_rejected() {
        let mut m = base();
        m.dependencies.push(super::super::manifest::DependencyDecl {
            package: "not-on-allowlist".into(),
            version: semver::VersionReq::STAR,
        });
        let err = check_dependency_allow_list(&m).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("not-on-allowlist"));
    }

    #[test]
    fn test_allowed_dependency_passes() {
        let mut m = base();
        m.dependencies.push(super::super::manifest::DependencyDecl {
            package: "serde".into(),
            version: semver::VersionReq::parse("^1").unwrap(),
        });
        check_dependency_allow_list(&m).unwrap();
        check_bundled_availability(&m).unwrap();
    }

    #[test]
    fn test_bundled_version_mismatch_rejected() {
        let mut m = base();
        m.dependencies.push(super::super::manifest::DependencyDecl {
            package: "serde".into(),
            version: semver::VersionReq::parse(">=99").unwrap(),
        });
        let err = check_bundled_availability(&m).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("serde"));
    }

    #[test]
    fn test_host_compatibility() {
        let mut m = base();
        m.min_host_version = Some(semver::VersionReq::parse(">=0.1").unwrap());
        check_host_compatibility(&m).unwrap();

        m.min_host_version = Some(semver::VersionReq::parse(">=99.0").unwrap());
        let err = check_host_compatibility(&m).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_empty_author_rejected() {
        let mut m = base();
        m.author = String::new();
        assert!(check_manifest_fields(&m).is_err());
    }

    #[test]
    fn test_source_scan_flags_risky_patterns_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(
            src.join("main.py"),
            "import os\nos.system(\"rm -rf /\")\nresult = eval(user_input)\n",
        )
        .unwrap();

        let warnings = scan_sources(dir.path()).unwrap();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].line, 2);
        assert_eq!(warnings[1].line, 3);
    }

    #[test]
    fn test_source_scan_clean_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("lib.rs"), "pub fn noop() {}\n").unwrap();
        assert!(scan_sources(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_validate_extension_surfaces_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("run.py"), "subprocess.run([\"ls\"])\n").unwrap();

        let report = validate_extension(dir.path(), &base()).unwrap();
        assert_eq!(report.warnings.len(), 1);
    }
}
