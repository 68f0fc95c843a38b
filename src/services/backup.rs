//! Source-folder backups
//!
//! Snapshots are taken before any transcoding starts and referenced by the
//! owning conversion job. They persist through conversion failure (the inputs
//! stay recoverable) and are only reclaimed after the downstream tagging run
//! succeeds, or by an operator.

use crate::error::Result;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Creates and reclaims timestamped folder snapshots under a dedicated root
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Copy a folder recursively to `<root>/<basename>_<timestamp>`
    pub fn snapshot(&self, folder: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;

        let basename = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "folder".to_string());
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let dest = self.root.join(format!("{}_{}", basename, timestamp));

        copy_dir_recursive(folder, &dest)?;
        tracing::info!(
            source = %folder.display(),
            backup = %dest.display(),
            "Created source folder snapshot"
        );

        Ok(dest)
    }

    /// Best-effort recursive deletion of snapshot paths.
    ///
    /// A missing path is not an error and one failed deletion never prevents
    /// attempting the rest; reclamation is considered complete regardless.
    pub fn reclaim(&self, paths: &[String]) {
        for path in paths {
            let path = Path::new(path);
            if !path.exists() {
                tracing::debug!(path = %path.display(), "Backup already gone, skipping");
                continue;
            }
            match std::fs::remove_dir_all(path) {
                Ok(()) => tracing::info!(path = %path.display(), "Reclaimed backup"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to reclaim backup")
                }
            }
        }
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}
