//! Extension manifest model.
//!
//! Every extension package carries a `manifest.json` at its root declaring
//! identity, dependencies, permissions, navigation contributions, and the
//! schema objects it owns. The manifest is the single declarative source the
//! runtime validates and registers from; nothing is inferred from code.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name of the manifest inside an extension directory or package.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Pricing model of an extension, gating entitlement checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingKind {
    /// Always usable, never checked against the entitlement service.
    #[default]
    Free,
    /// One-time purchase.
    Paid,
    /// Recurring subscription.
    Subscription,
}

impl std::fmt::Display for PricingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Paid => write!(f, "paid"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// A declared third-party dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDecl {
    /// Package name, matched against the host allow-list.
    pub package: String,
    /// Version requirement against the host's bundled copy.
    #[serde(default = "any_version")]
    pub version: semver::VersionReq,
}

fn any_version() -> semver::VersionReq {
    semver::VersionReq::STAR
}

/// A declared permission. The stored codename is `"{extension_id}.{action}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecl {
    /// Action code, e.g. `"view"` or `"redeem_points"`.
    pub action: String,
    /// Human-readable permission name.
    pub name: String,
}

/// A menu contribution to the host navigation surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuDecl {
    /// Menu label.
    pub label: String,
    /// Route the entry links to.
    pub route: String,
    /// Ordering priority; lower sorts first, ties break on extension id.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    100
}

/// Declarative schema block: the storage objects the extension owns.
///
/// Conflict detection reads this block, not the extension's source. Table
/// names are global in the shared store, so authors conventionally prefix
/// them with the namespace label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDecl {
    /// Namespace/module label; defaults to the extension id.
    #[serde(default)]
    pub namespace: String,
    /// Storage table names the extension will create.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Entity (model) names the extension registers.
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Extension manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Unique extension identifier (lowercase, `a-z0-9`, `-`/`_`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Extension version.
    pub version: semver::Version,
    /// Author.
    pub author: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minimum host version requirement, e.g. `">=0.3"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_host_version: Option<semver::VersionReq>,
    /// Pricing model.
    #[serde(default)]
    pub pricing: PricingKind,
    /// URL prefix contributed to the host router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_prefix: Option<String>,
    /// Menu contribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu: Option<MenuDecl>,
    /// Declared third-party dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
    /// Declared permissions.
    #[serde(default)]
    pub permissions: Vec<PermissionDecl>,
    /// Declared schema objects.
    #[serde(default)]
    pub schema: SchemaDecl,
}

impl ExtensionManifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(text)
            .map_err(|e| Error::Validation(format!("invalid manifest: {}", e)))?;
        Ok(manifest)
    }

    /// Load the manifest from an extension directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE_NAME);
        if !path.exists() {
            return Err(Error::Validation(format!(
                "missing {} in {}",
                MANIFEST_FILE_NAME,
                dir.display()
            )));
        }
        let text = fs::read_to_string(&path)?;
        Self::from_json(&text)
    }

    /// Write the manifest into an extension directory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(MANIFEST_FILE_NAME), text)?;
        Ok(())
    }

    /// Namespace label: the declared one, falling back to the extension id.
    pub fn namespace(&self) -> &str {
        if self.schema.namespace.is_empty() {
            &self.id
        } else {
            &self.schema.namespace
        }
    }

    /// Stored codename for one of this extension's actions.
    pub fn codename(&self, action: &str) -> String {
        format!("{}.{}", self.id, action)
    }

    /// Menu ordering priority; extensions without a menu sort last.
    pub fn priority(&self) -> i32 {
        self.menu.as_ref().map(|m| m.priority).unwrap_or(i32::MAX)
    }
}

/// Check an extension id: lowercase alphanumeric with `-`/`_`, starting
/// with a letter.
pub fn is_valid_extension_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
