//! Extension package archives.
//!
//! Packages are zip archives of an extension directory: the manifest at the
//! root plus source, migrations, locales, and static assets. Packing skips
//! hidden entries and writes a `.sha256` sidecar next to the archive;
//! extraction verifies the sidecar when present and refuses entries that
//! would escape the destination directory.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::extension::manifest::{ExtensionManifest, MANIFEST_FILE_NAME};

/// Extension of the checksum sidecar written next to an archive.
pub const CHECKSUM_SUFFIX: &str = "sha256";

/// Pack an extension directory into a zip archive.
///
/// Entries are written in sorted order; hidden files and directories are
/// skipped. Returns the hex checksum also written to the sidecar.
pub fn pack(src_dir: &Path, archive_path: &Path) -> Result<String> {
    if !src_dir.join(MANIFEST_FILE_NAME).exists() {
        return Err(Error::Validation(format!(
            "{} has no {}",
            src_dir.display(),
            MANIFEST_FILE_NAME
        )));
    }

    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::new();
    collect_entries(src_dir, src_dir, &mut entries)?;
    entries.sort();

    for relative in &entries {
        let path = src_dir.join(relative);
        // Zip entry names always use forward slashes.
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if path.is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let bytes = fs::read(&path)?;
            zip.write_all(&bytes)?;
        }
    }
    zip.finish()?;

    let checksum = file_sha256(archive_path)?;
    fs::write(checksum_path(archive_path), format!("{}\n", checksum))?;
    debug!(archive = %archive_path.display(), %checksum, "packed extension archive");
    Ok(checksum)
}

fn collect_entries(root: &Path, dir: &Path, entries: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .expect("entry is under the walked root")
            .to_path_buf();
        entries.push(relative);
        if path.is_dir() {
            collect_entries(root, &path, entries)?;
        }
    }
    Ok(())
}

/// Verify the archive against its `.sha256` sidecar.
///
/// A missing sidecar is accepted (older packages have none); a mismatch is
/// a validation failure.
pub fn verify_checksum(archive_path: &Path) -> Result<()> {
    let sidecar = checksum_path(archive_path);
    if !sidecar.exists() {
        debug!(archive = %archive_path.display(), "no checksum sidecar, skipping verification");
        return Ok(());
    }
    let expected = fs::read_to_string(&sidecar)?;
    let expected = expected.trim();
    let actual = file_sha256(archive_path)?;
    if expected != actual {
        return Err(Error::Validation(format!(
            "checksum mismatch for {}: expected {}, got {}",
            archive_path.display(),
            expected,
            actual
        )));
    }
    Ok(())
}

/// Read the manifest out of an archive without extracting it.
pub fn read_manifest(archive_path: &Path) -> Result<ExtensionManifest> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut entry = archive.by_name(MANIFEST_FILE_NAME).map_err(|_| {
        Error::Validation(format!(
            "{} has no {} at the archive root",
            archive_path.display(),
            MANIFEST_FILE_NAME
        ))
    })?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    ExtensionManifest::from_json(&text)
}

/// Extract an archive into `dest_dir`, creating it if needed.
///
/// Entries whose names would resolve outside the destination are skipped
/// with a warning rather than written.
pub fn unpack(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest_dir)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = %entry.name(), "skipping archive entry escaping the destination");
            continue;
        };
        let target = dest_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

/// Path of the checksum sidecar for an archive.
pub fn checksum_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(".");
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
