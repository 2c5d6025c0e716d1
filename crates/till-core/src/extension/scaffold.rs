//! Extension scaffold generation.
//!
//! `till create <id>` writes a working skeleton straight into the
//! extensions root, in the inactive state, ready to edit, validate, and
//! package.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config;
use crate::error::{ConflictKind, Error, Result};
use crate::extension::manifest::{
    is_valid_extension_id, ExtensionManifest, MenuDecl, PermissionDecl, PricingKind, SchemaDecl,
};
use crate::extension::state::{dir_name_for, LifecycleState};

/// Create a new extension skeleton under `root`, named `_<id>`.
pub fn create(root: &Path, id: &str, author: &str) -> Result<PathBuf> {
    if !is_valid_extension_id(id) {
        return Err(Error::Validation(format!(
            "invalid extension id {:?}: expected lowercase alphanumeric with '-' or '_'",
            id
        )));
    }
    for state in [
        LifecycleState::Active,
        LifecycleState::Inactive,
        LifecycleState::Hidden,
    ] {
        let existing = root.join(dir_name_for(id, state));
        if existing.exists() {
            return Err(Error::conflict(
                ConflictKind::Directory,
                dir_name_for(id, state),
            ));
        }
    }

    let dir = root.join(dir_name_for(id, LifecycleState::Inactive));
    fs::create_dir_all(dir.join("src"))?;
    fs::create_dir_all(dir.join("migrations"))?;
    fs::create_dir_all(dir.join("i18n"))?;
    fs::create_dir_all(dir.join("static"))?;

    let manifest = template_manifest(id, author);
    manifest.save(&dir)?;

    let display_name = &manifest.name;
    fs::write(
        dir.join("src").join("lib.rs"),
        format!(
            "//! {} extension.\n\npub fn register() {{\n    // Entry point called by the host after load.\n}}\n",
            display_name
        ),
    )?;
    fs::write(
        dir.join("i18n").join("en.json"),
        format!("{{\n  \"title\": \"{}\"\n}}\n", display_name),
    )?;
    fs::write(
        dir.join("migrations").join("README.md"),
        "Schema migration scripts, applied in file name order.\nEvery table they create must be declared in manifest.json.\n",
    )?;

    info!(extension_id = %id, path = %dir.display(), "extension skeleton created");
    Ok(dir)
}

fn template_manifest(id: &str, author: &str) -> ExtensionManifest {
    let host = config::host_version();
    let min_host = semver::VersionReq::parse(&format!(">={}.{}", host.major, host.minor))
        .expect("generated requirement is valid");
    ExtensionManifest {
        id: id.to_string(),
        name: display_name(id),
        version: semver::Version::new(0, 1, 0),
        author: author.to_string(),
        description: None,
        min_host_version: Some(min_host),
        pricing: PricingKind::Free,
        url_prefix: Some(id.to_string()),
        menu: Some(MenuDecl {
            label: display_name(id),
            route: format!("/{}", id),
            priority: 100,
        }),
        dependencies: Vec::new(),
        permissions: vec![PermissionDecl {
            action: "view".into(),
            name: format!("View {}", display_name(id)),
        }],
        schema: SchemaDecl {
            namespace: id.to_string(),
            tables: Vec::new(),
            entities: Vec::new(),
        },
    }
}

/// `"loyalty-points"` -> `"Loyalty Points"`.
fn display_name(id: &str) -> String {
    id.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
