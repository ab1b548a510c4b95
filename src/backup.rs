//! Backup artifact management.
//!
//! The backup is a sibling of the target named `<stem>_ori<.ext>`. It is
//! written once per run, before the target is touched, and read back to
//! confirm it landed intact. It is never modified afterwards; its only reader
//! is [`BackupManager::restore`].

use crate::edit::atomic_write;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Suffix inserted between file stem and extension.
pub const BACKUP_SUFFIX: &str = "_ori";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("cannot create backup file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup file {path} did not read back identical to the original")]
    Unverified { path: PathBuf },

    #[error("cannot read backup file {path}: {source}")]
    ReadBackup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot restore {target} from backup: {source}")]
    Restore {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Derives, writes, checks, and restores backup artifacts.
#[derive(Debug, Clone)]
pub struct BackupManager {
    suffix: String,
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupManager {
    pub fn new() -> Self {
        Self {
            suffix: BACKUP_SUFFIX.to_string(),
        }
    }

    /// Sibling path with the suffix inserted before the extension.
    ///
    /// `out/extension.js` becomes `out/extension_ori.js`; a file without an
    /// extension just gets the suffix appended.
    pub fn backup_path_for(&self, original: &Path) -> PathBuf {
        let stem = original.file_stem().unwrap_or_default();
        let mut name = OsString::from(stem);
        name.push(&self.suffix);
        if let Some(ext) = original.extension() {
            name.push(".");
            name.push(ext);
        }
        original.with_file_name(name)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Persist `text` at `path` and confirm it reads back identical.
    ///
    /// When `original` is given, the backup also takes over its permissions
    /// and modification time so the artifact reflects the untouched file.
    pub fn write(&self, path: &Path, text: &str, original: Option<&Path>) -> Result<(), BackupError> {
        let write_err = |source| BackupError::Write {
            path: path.to_path_buf(),
            source,
        };

        atomic_write(path, text.as_bytes()).map_err(write_err)?;

        let written = fs::read(path).map_err(|source| BackupError::ReadBackup {
            path: path.to_path_buf(),
            source,
        })?;
        if xxh3_64(&written) != xxh3_64(text.as_bytes()) {
            return Err(BackupError::Unverified {
                path: path.to_path_buf(),
            });
        }

        if let Some(original) = original {
            if let Ok(meta) = fs::metadata(original) {
                fs::set_permissions(path, meta.permissions()).map_err(write_err)?;
                let mtime = filetime::FileTime::from_last_modification_time(&meta);
                filetime::set_file_mtime(path, mtime).map_err(write_err)?;
            }
        }

        tracing::info!(backup = %path.display(), bytes = text.len(), "backup created");
        Ok(())
    }

    /// Copy the backup content back onto `target`.
    ///
    /// An existing target keeps its permissions; a missing one is recreated
    /// with the backup's. A failure here means the target may be left
    /// mutated; callers must surface it as such and not retry silently.
    pub fn restore(&self, backup: &Path, target: &Path) -> Result<(), BackupError> {
        let read_err = |source| BackupError::ReadBackup {
            path: backup.to_path_buf(),
            source,
        };
        let content = fs::read(backup).map_err(read_err)?;
        let recreate = !target.exists();

        let restore_err = |source| BackupError::Restore {
            target: target.to_path_buf(),
            source,
        };
        atomic_write(target, &content).map_err(restore_err)?;
        if recreate {
            let permissions = fs::metadata(backup).map_err(read_err)?.permissions();
            fs::set_permissions(target, permissions).map_err(restore_err)?;
        }

        tracing::info!(
            backup = %backup.display(),
            target = %target.display(),
            "original restored from backup"
        );
        Ok(())
    }
}
