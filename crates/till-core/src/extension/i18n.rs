//! Locale catalog compilation.
//!
//! Extensions may bundle translations as flat JSON maps under `i18n/`,
//! one file per locale (`en.json`, `de.json`, ...). Installation compiles
//! them into a single `.catalog.json` inside the extension directory so the
//! host reads one file per extension at render time. Files are merged in
//! sorted order and later files win per key.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Directory holding per-locale JSON files inside an extension.
pub const LOCALES_DIR: &str = "i18n";

/// Compiled catalog written into the extension directory. Hidden so it is
/// never packed into an archive.
pub const CATALOG_FILE_NAME: &str = ".catalog.json";

/// Compile the locale files of an extension directory.
///
/// Returns the number of locales compiled; zero when the extension bundles
/// no translations (no `i18n/` directory, or an empty one).
pub fn compile_locales(ext_dir: &Path) -> Result<usize> {
    let locales_dir = ext_dir.join(LOCALES_DIR);
    if !locales_dir.is_dir() {
        return Ok(0);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&locales_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Ok(0);
    }

    let mut catalog: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for path in &files {
        let locale = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.split('.').next().unwrap_or(s).to_string())
            .unwrap_or_default();
        if locale.is_empty() {
            continue;
        }
        let text = fs::read_to_string(path)?;
        let messages: BTreeMap<String, String> = serde_json::from_str(&text).map_err(|e| {
            Error::Validation(format!("invalid locale file {}: {}", path.display(), e))
        })?;
        catalog.entry(locale).or_default().extend(messages);
    }

    let compiled = ext_dir.join(CATALOG_FILE_NAME);
    fs::write(&compiled, serde_json::to_string_pretty(&catalog)?)?;
    debug!(path = %compiled.display(), locales = catalog.len(), "compiled locale catalog");
    Ok(catalog.len())
}
