//! Path validation for the file being patched and where results go.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Path checks run before any file is read or written.
#[derive(Debug, Clone)]
pub struct TargetGuard {
    /// Canonical path of the file being patched
    input: PathBuf,
    /// Where the backup of `input` will live
    backup: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("File {0} does not exist")]
    Missing(PathBuf),

    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("Output path {output} would overwrite the backup of {input}")]
    OutputIsBackup { output: PathBuf, input: PathBuf },

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl TargetGuard {
    /// Validate `input` and remember where its backup goes.
    ///
    /// The input is canonicalized so symlinked bundles are patched (and
    /// backed up) at their real location.
    pub fn new(input: impl AsRef<Path>, backup_path_for: impl Fn(&Path) -> PathBuf) -> Result<Self, SafetyError> {
        let input = input.as_ref();
        if !input.exists() {
            return Err(SafetyError::Missing(input.to_path_buf()));
        }

        let canonical = input.canonicalize()?;
        if !canonical.is_file() {
            return Err(SafetyError::NotAFile(canonical));
        }

        let backup = backup_path_for(&canonical);
        Ok(Self {
            input: canonical,
            backup,
        })
    }

    /// Like [`TargetGuard::new`], but the input may have been deleted.
    ///
    /// A missing input is resolved lexically so its backup can still be
    /// found and the file recreated.
    pub fn for_restore(
        input: impl AsRef<Path>,
        backup_path_for: impl Fn(&Path) -> PathBuf,
    ) -> Result<Self, SafetyError> {
        let input = input.as_ref();
        if input.exists() {
            return Self::new(input, backup_path_for);
        }

        let resolved = resolve_lexically(input)?;
        let backup = backup_path_for(&resolved);
        Ok(Self {
            input: resolved,
            backup,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    /// Check a separate output path.
    ///
    /// Returns `None` when `output` resolves to the input itself (an in-place
    /// run), otherwise the path to write.
    pub fn validate_output(&self, output: &Path) -> Result<Option<PathBuf>, SafetyError> {
        let resolved = resolve_lexically(output)?;

        if let Ok(existing) = output.canonicalize() {
            if existing == self.input {
                return Ok(None);
            }
            if existing == self.backup {
                return Err(SafetyError::OutputIsBackup {
                    output: output.to_path_buf(),
                    input: self.input.clone(),
                });
            }
            if existing.is_dir() {
                return Err(SafetyError::NotAFile(existing));
            }
        }

        if resolved == self.backup {
            return Err(SafetyError::OutputIsBackup {
                output: output.to_path_buf(),
                input: self.input.clone(),
            });
        }

        Ok(Some(resolved))
    }
}

/// Absolute form of a path that may not exist yet: canonicalize the parent,
/// keep the file name.
fn resolve_lexically(path: &Path) -> Result<PathBuf, SafetyError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => Ok(parent.join(name)),
            Err(_) => Ok(absolute),
        },
        _ => Ok(absolute),
    }
}
