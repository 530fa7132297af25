//! Publication of package `assets/` folders into the public directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use walkdir::WalkDir;

use crate::extension::package_store::{io_error, PackageError};

const ASSETS_DIR: &str = "assets";

#[derive(Debug, Clone)]
pub struct AssetPublisher {
    public_root: PathBuf,
}

impl AssetPublisher {
    pub fn new(public_root: impl Into<PathBuf>) -> Self {
        Self {
            public_root: public_root.into(),
        }
    }

    pub fn target_dir(&self, code: &str) -> PathBuf {
        self.public_root.join(code)
    }

    /// Copies `<package>/assets` verbatim to `<public>/<code>`, replacing any
    /// earlier publication. Returns the number of files copied.
    pub fn publish(&self, code: &str, package_dir: &Path) -> Result<usize, PackageError> {
        let source = package_dir.join(ASSETS_DIR);
        if !source.is_dir() {
            return Ok(0);
        }
        let target = self.target_dir(code);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(io_error(&target))?;
        }

        let mut copied = 0;
        for entry in WalkDir::new(&source).follow_links(false) {
            let entry = entry.map_err(|err| PackageError::Io {
                path: source.clone(),
                source: err.into(),
            })?;
            let Ok(relative) = entry.path().strip_prefix(&source) else {
                continue;
            };
            let destination = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&destination).map_err(io_error(&destination))?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &destination).map_err(io_error(&destination))?;
                copied += 1;
            }
        }

        info!("event=assets_publish module=assets status=ok code={code} files={copied}");
        Ok(copied)
    }

    pub fn unpublish(&self, code: &str) -> Result<(), PackageError> {
        let target = self.target_dir(code);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(io_error(&target))?;
            info!("event=assets_unpublish module=assets status=ok code={code}");
        }
        Ok(())
    }
}
