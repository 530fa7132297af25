//! On-disk extension packages: listing, manifest reads, archive staging and
//! atomic replacement.
//!
//! # Invariants
//! - A package lives in `<root>/<code>/` with `manifest.json` at its root.
//! - Directories starting with `.` (staging, backups) are never packages.
//! - Only codes matching `[a-z0-9_]+` map to a path, so no operation leaves
//!   `<root>`.
//! - `commit` either leaves the previous package in place or the new one;
//!   never a mix.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{info, warn};
use tar::Archive;
use tempfile::TempDir;
use thiserror::Error;

use crate::extension::manifest::{is_valid_code, Manifest, ManifestError, MANIFEST_FILE_NAME};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package not found on disk: {0}")]
    NotFound(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("archive rejected: {0}")]
    Archive(String),
    #[error("i/o failure at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PackageError + '_ {
    move |source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A package found on disk.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    pub manifest: Manifest,
    pub path: PathBuf,
}

/// An extracted, validated archive waiting to be swapped into place.
#[derive(Debug)]
pub struct StagedPackage {
    // Dropping the staging dir removes whatever was not moved out of it.
    _staging: TempDir,
    root: PathBuf,
    manifest: Manifest,
}

impl StagedPackage {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

/// Filesystem view over the packages directory.
#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_dir(&self, code: &str) -> Result<PathBuf, PackageError> {
        if !is_valid_code(code) {
            return Err(ManifestError::InvalidCode(code.to_string()).into());
        }
        Ok(self.root.join(code))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.package_dir(code)
            .is_ok_and(|dir| dir.join(MANIFEST_FILE_NAME).is_file())
    }

    /// Reads the manifest of `code`'s package. The manifest's own `code`
    /// must match the directory name.
    pub fn read_manifest(&self, code: &str) -> Result<Manifest, PackageError> {
        let dir = self.package_dir(code)?;
        if !dir.join(MANIFEST_FILE_NAME).is_file() {
            return Err(PackageError::NotFound(code.to_string()));
        }
        let manifest = Manifest::load(&dir)?;
        if manifest.code != code {
            return Err(ManifestError::CodeMismatch {
                expected: code.to_string(),
                found: manifest.code,
            }
            .into());
        }
        Ok(manifest)
    }

    /// Lists every readable package, sorted by code. Unreadable manifests are
    /// logged and skipped so one broken upload does not hide the rest.
    pub fn list(&self) -> Result<Vec<PackageEntry>, PackageError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.root).map_err(io_error(&self.root))? {
            let dir_entry = dir_entry.map_err(io_error(&self.root))?;
            let path = dir_entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !path.is_dir() {
                continue;
            }
            if !path.join(MANIFEST_FILE_NAME).is_file() {
                continue;
            }
            match self.read_manifest(name) {
                Ok(manifest) => entries.push(PackageEntry { manifest, path }),
                Err(err) => {
                    warn!(
                        "event=package_scan module=packages status=skipped code={name} error={err}"
                    );
                }
            }
        }
        entries.sort_by(|a, b| a.manifest.code.cmp(&b.manifest.code));
        Ok(entries)
    }

    /// Extracts a gzip tarball into a staging directory under the packages
    /// root and validates its manifest.
    pub fn stage_archive(&self, bytes: &[u8], max_bytes: u64) -> Result<StagedPackage, PackageError> {
        if bytes.len() as u64 > max_bytes {
            return Err(PackageError::Archive(format!(
                "archive is {} bytes, limit is {max_bytes}",
                bytes.len()
            )));
        }

        fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)
            .map_err(io_error(&self.root))?;

        let mut archive = Archive::new(GzDecoder::new(bytes));
        archive
            .unpack(staging.path())
            .map_err(|err| PackageError::Archive(format!("not a readable .tar.gz archive: {err}")))?;

        let root = locate_package_root(staging.path())?;
        let manifest = Manifest::load(&root)
            .map_err(|err| PackageError::Archive(err.to_string()))?;
        manifest
            .validate()
            .map_err(|err| PackageError::Archive(err.to_string()))?;

        Ok(StagedPackage {
            _staging: staging,
            root,
            manifest,
        })
    }

    /// Swaps a staged package into `<root>/<code>/`, replacing any previous
    /// version. The previous directory is restored if the swap fails.
    pub fn commit(&self, staged: StagedPackage) -> Result<PathBuf, PackageError> {
        let code = staged.manifest.code.clone();
        let target = self.package_dir(&code)?;
        let backup = self.root.join(format!(".{code}.previous"));

        if backup.exists() {
            fs::remove_dir_all(&backup).map_err(io_error(&backup))?;
        }
        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &backup).map_err(io_error(&target))?;
        }

        if let Err(source) = fs::rename(&staged.root, &target) {
            if had_previous {
                if let Err(restore) = fs::rename(&backup, &target) {
                    warn!(
                        "event=package_commit module=packages status=error code={code} error_code=restore_failed error={restore}"
                    );
                }
            }
            return Err(PackageError::Io {
                path: target,
                source,
            });
        }

        if had_previous {
            if let Err(err) = fs::remove_dir_all(&backup) {
                warn!(
                    "event=package_commit module=packages status=ok code={code} error_code=backup_cleanup_failed error={err}"
                );
            }
        }
        info!(
            "event=package_commit module=packages status=ok code={code} version={} replaced={had_previous}",
            staged.manifest.version
        );
        Ok(target)
    }

    pub fn remove(&self, code: &str) -> Result<(), PackageError> {
        let dir = self.package_dir(code)?;
        if !dir.exists() {
            return Err(PackageError::NotFound(code.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
        info!("event=package_remove module=packages status=ok code={code}");
        Ok(())
    }
}

/// Manifest at the archive root, or inside its single top-level directory.
fn locate_package_root(extracted: &Path) -> Result<PathBuf, PackageError> {
    if extracted.join(MANIFEST_FILE_NAME).is_file() {
        return Ok(extracted.to_path_buf());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(extracted).map_err(io_error(extracted))? {
        let path = entry.map_err(io_error(extracted))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.') || n == "__MACOSX");
        if path.is_dir() && !hidden {
            dirs.push(path);
        }
    }

    match dirs.as_slice() {
        [single] if single.join(MANIFEST_FILE_NAME).is_file() => Ok(single.clone()),
        _ => Err(PackageError::Archive(format!(
            "{MANIFEST_FILE_NAME} not found at archive root or in a single top-level directory"
        ))),
    }
}
