//! Patch applicator - one run over one file
//!
//! A run:
//! - rejects a mode the catalog cannot fully serve, before any I/O
//! - reads the target once
//! - asks for confirmation when the text looks patched or a backup exists
//! - computes the whole patched text in memory (locate, insert, re-locate,
//!   rewrite) so a missing mandatory target never leads to a write
//! - writes and verifies the backup, then commits the patched text
//! - on commit failure restores from the backup and reports both outcomes

use crate::backup::{BackupError, BackupManager};
use crate::catalog::{CatalogError, PatchCatalog, PatchMode};
use crate::edit::{atomic_write, EditError, Insertion, SourceText};
use crate::locator::{self, LocateError};
use crate::marker::{self, PatchSignature};
use crate::rewrite::{self, RewriteReport, RewriteState};
use crate::safety::{SafetyError, TargetGuard};
use crate::session;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Advisory condition that needs an operator decision before the run goes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// The text already contains patch markers
    AlreadyPatched { markers: Vec<&'static str> },
    /// A backup artifact would be overwritten
    BackupExists { path: PathBuf },
}

impl Gate {
    pub fn kind(&self) -> GateKind {
        match self {
            Gate::AlreadyPatched { .. } => GateKind::AlreadyPatched,
            Gate::BackupExists { .. } => GateKind::BackupExists,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    AlreadyPatched,
    BackupExists,
}

/// Supplies yes/no answers at confirmation gates.
pub trait Confirmation {
    fn confirm(&mut self, gate: &Gate) -> bool;
}

impl<F> Confirmation for F
where
    F: FnMut(&Gate) -> bool,
{
    fn confirm(&mut self, gate: &Gate) -> bool {
        self(gate)
    }
}

/// Answers every gate the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirmation for FixedAnswer {
    fn confirm(&mut self, _gate: &Gate) -> bool {
        self.0
    }
}

/// Options for a single run.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub mode: PatchMode,
    /// Write here instead of patching the input in place
    pub output: Option<PathBuf>,
    /// Compute everything, write nothing
    pub dry_run: bool,
}

/// What happened at one target function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Patched { offset: usize, inserted_bytes: usize },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub function: &'static str,
    pub required: bool,
    #[serde(flatten)]
    pub status: TargetStatus,
}

/// Result of the in-memory part of a run.
#[derive(Debug, Clone)]
pub struct PatchedText {
    pub text: SourceText,
    pub targets: Vec<TargetReport>,
    pub rewrites: Vec<RewriteReport>,
    pub warnings: Vec<String>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    pub mode: PatchMode,
    pub input: PathBuf,
    /// Where the patched text went (`None` for dry runs)
    pub output: Option<PathBuf>,
    /// Backup written by this run, if any
    pub backup: Option<PathBuf>,
    pub run_id: String,
    pub dry_run: bool,
    /// Markers found before patching (non-empty means the operator confirmed)
    pub prior_markers: Vec<&'static str>,
    pub targets: Vec<TargetReport>,
    pub rewrites: Vec<RewriteReport>,
    pub warnings: Vec<String>,
    pub bytes_before: usize,
    pub bytes_after: usize,
    #[serde(skip)]
    pub original: String,
    #[serde(skip)]
    pub patched: String,
}

impl PatchReport {
    /// Number of target functions that received an insertion.
    pub fn patched_functions(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t.status, TargetStatus::Patched { .. }))
            .count()
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<PatchReport>),
    /// The operator declined at a gate; nothing was written
    Cancelled { gate: GateKind },
}

/// Read-only view of a target file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub input: PathBuf,
    pub backup: PathBuf,
    pub backup_exists: bool,
    pub markers: Vec<&'static str>,
    pub run_ids: Vec<String>,
    pub targets: Vec<TargetLocation>,
    pub rewrites: Vec<RewriteCheck>,
}

impl StatusReport {
    pub fn is_patched(&self) -> bool {
        !self.markers.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RewriteCheck {
    pub rule: &'static str,
    pub description: &'static str,
    pub state: RewriteState,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetLocation {
    pub function: &'static str,
    pub required: bool,
    pub offset: Option<usize>,
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Input(#[from] SafetyError),

    #[error("Cannot read file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: EditError,
    },

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error("Cannot insert into {function}: {source}")]
    Insert {
        function: &'static str,
        #[source]
        source: EditError,
    },

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("Cannot write patched file {path}: {source}; original file restored from backup")]
    CommitRestored {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Cannot write patched file {path}: {source}; restoring from {backup} also failed ({restore}). \
         {path} is in an unknown state"
    )]
    CommitUnrestored {
        path: PathBuf,
        backup: PathBuf,
        source: std::io::Error,
        restore: BackupError,
    },

    #[error("Cannot write output file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No backup found at {0}")]
    NoBackup(PathBuf),
}

impl PatchError {
    /// The target may hold partially patched or otherwise unknown content.
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, PatchError::CommitUnrestored { .. })
    }
}

/// Puts the patched text at the target path during an in-place commit.
pub type CommitWriter = fn(&Path, &[u8]) -> std::io::Result<()>;

/// Runs the patch pipeline against files.
#[derive(Clone)]
pub struct PatchApplier {
    catalog: PatchCatalog,
    backups: BackupManager,
    commit_writer: CommitWriter,
}

impl Default for PatchApplier {
    fn default() -> Self {
        Self::new(PatchCatalog::default())
    }
}

impl std::fmt::Debug for PatchApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchApplier")
            .field("catalog", &self.catalog)
            .field("backups", &self.backups)
            .finish_non_exhaustive()
    }
}

impl PatchApplier {
    pub fn new(catalog: PatchCatalog) -> Self {
        Self {
            catalog,
            backups: BackupManager::new(),
            commit_writer: atomic_write,
        }
    }

    /// Replace the in-place commit write. Backups and restores still go
    /// through [`BackupManager`].
    pub fn with_commit_writer(mut self, writer: CommitWriter) -> Self {
        self.commit_writer = writer;
        self
    }

    pub fn catalog(&self) -> &PatchCatalog {
        &self.catalog
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    fn guard(&self, input: &Path) -> Result<TargetGuard, PatchError> {
        Ok(TargetGuard::new(input, |p| self.backups.backup_path_for(p))?)
    }

    /// Insert every target's snippet and apply the rewrites, in memory.
    ///
    /// Each target is located against the text produced by the previous
    /// insertion, never against the original offsets.
    pub fn patch_text(
        &self,
        source: &SourceText,
        mode: PatchMode,
        run_id: &str,
    ) -> Result<PatchedText, PatchError> {
        self.catalog.validate_mode(mode)?;

        let stamp = marker::run_stamp(run_id);
        let mut current = source.clone();
        let mut targets = Vec::with_capacity(self.catalog.targets().len());
        let mut warnings = Vec::new();

        for target in self.catalog.targets() {
            let entry = match locator::find(current.as_str(), target.name)? {
                Some(entry) => entry,
                None if target.required => {
                    return Err(LocateError::NotFound {
                        function: target.name.to_string(),
                    }
                    .into())
                }
                None => {
                    tracing::warn!(function = target.name, "optional target not found, skipping");
                    warnings.push(format!(
                        "async {} function not found - skipped",
                        target.name
                    ));
                    targets.push(TargetReport {
                        function: target.name,
                        required: false,
                        status: TargetStatus::Skipped,
                    });
                    continue;
                }
            };

            let text = format!("{}{stamp}", target.insertion(mode)?);
            let inserted_bytes = text.len();
            let insertion = Insertion::new(entry.offset, text, entry.signature(current.as_str()));
            current = current
                .with_insertion(&insertion)
                .map_err(|source| PatchError::Insert {
                    function: target.name,
                    source,
                })?;

            tracing::info!(function = target.name, offset = entry.offset, "patched function entry");
            targets.push(TargetReport {
                function: target.name,
                required: target.required,
                status: TargetStatus::Patched {
                    offset: entry.offset,
                    inserted_bytes,
                },
            });
        }

        let (rewritten, rewrites) = rewrite::apply_all(current.as_str());
        for report in &rewrites {
            if report.status == rewrite::RewriteStatus::NotFound {
                warnings.push(format!("{} pattern not found", report.rule));
            }
        }

        Ok(PatchedText {
            text: SourceText::from(rewritten),
            targets,
            rewrites,
            warnings,
        })
    }

    /// Run the full pipeline on `input`.
    ///
    /// Cancellation at a gate is `Ok(RunOutcome::Cancelled)`, not an error.
    pub fn run(
        &self,
        input: &Path,
        options: &ApplyOptions,
        confirm: &mut dyn Confirmation,
    ) -> Result<RunOutcome, PatchError> {
        // Validate
        self.catalog.validate_mode(options.mode)?;
        let guard = self.guard(input)?;
        let output = match &options.output {
            Some(path) => guard.validate_output(path)?,
            None => None,
        };
        let in_place = output.is_none();

        // Load
        let source = SourceText::read(guard.input()).map_err(|source| PatchError::Read {
            path: guard.input().to_path_buf(),
            source,
        })?;
        tracing::debug!(input = %guard.input().display(), bytes = source.len(), "loaded target");

        // Idempotency gate
        let signature = PatchSignature::from_catalog(&self.catalog);
        let prior_markers = signature.found_in(source.as_str());
        if !prior_markers.is_empty() && !options.dry_run {
            tracing::warn!(markers = ?prior_markers, "file appears to be already patched");
            let gate = Gate::AlreadyPatched {
                markers: prior_markers.clone(),
            };
            if !confirm.confirm(&gate) {
                return Ok(RunOutcome::Cancelled { gate: gate.kind() });
            }
        }

        // Backup gate
        let backup_path = guard.backup().to_path_buf();
        let needs_backup = in_place && !options.dry_run;
        if needs_backup && self.backups.exists(&backup_path) {
            tracing::warn!(backup = %backup_path.display(), "backup file already exists");
            let gate = Gate::BackupExists {
                path: backup_path.clone(),
            };
            if !confirm.confirm(&gate) {
                return Ok(RunOutcome::Cancelled { gate: gate.kind() });
            }
        }

        // Locate, insert, rewrite - all before the first write
        let run_id = session::generate();
        let patched = self.patch_text(&source, options.mode, &run_id)?;

        let mut report = PatchReport {
            mode: options.mode,
            input: guard.input().to_path_buf(),
            output: None,
            backup: None,
            run_id,
            dry_run: options.dry_run,
            prior_markers,
            targets: patched.targets,
            rewrites: patched.rewrites,
            warnings: patched.warnings,
            bytes_before: source.len(),
            bytes_after: patched.text.len(),
            original: String::new(),
            patched: String::new(),
        };

        if options.dry_run {
            report.original = source.into_string();
            report.patched = patched.text.into_string();
            return Ok(RunOutcome::Completed(Box::new(report)));
        }

        match output {
            Some(path) => {
                atomic_write(&path, patched.text.as_str().as_bytes()).map_err(|source| {
                    PatchError::Output {
                        path: path.clone(),
                        source,
                    }
                })?;
                tracing::info!(output = %path.display(), "patched text written");
                report.output = Some(path);
            }
            None => {
                self.backups
                    .write(&backup_path, source.as_str(), Some(guard.input()))?;
                report.backup = Some(backup_path.clone());

                self.commit(guard.input(), &backup_path, &patched.text)?;
                report.output = Some(guard.input().to_path_buf());
            }
        }

        report.original = source.into_string();
        report.patched = patched.text.into_string();
        Ok(RunOutcome::Completed(Box::new(report)))
    }

    fn commit(&self, target: &Path, backup: &Path, text: &SourceText) -> Result<(), PatchError> {
        let Err(source) = (self.commit_writer)(target, text.as_str().as_bytes()) else {
            tracing::info!(target = %target.display(), "patched text committed");
            return Ok(());
        };

        tracing::error!(target = %target.display(), error = %source, "commit failed, restoring backup");
        match self.backups.restore(backup, target) {
            Ok(()) => Err(PatchError::CommitRestored {
                path: target.to_path_buf(),
                source,
            }),
            Err(restore) => {
                tracing::error!(
                    target = %target.display(),
                    error = %restore,
                    "restore failed, target state unknown"
                );
                Err(PatchError::CommitUnrestored {
                    path: target.to_path_buf(),
                    backup: backup.to_path_buf(),
                    source,
                    restore,
                })
            }
        }
    }

    /// Inspect `input` without changing anything.
    pub fn inspect(&self, input: &Path) -> Result<StatusReport, PatchError> {
        let guard = self.guard(input)?;
        let source = SourceText::read(guard.input()).map_err(|source| PatchError::Read {
            path: guard.input().to_path_buf(),
            source,
        })?;
        let text = source.as_str();

        let signature = PatchSignature::from_catalog(&self.catalog);
        let targets = self
            .catalog
            .targets()
            .iter()
            .map(|target| {
                Ok(TargetLocation {
                    function: target.name,
                    required: target.required,
                    offset: locator::find(text, target.name)?.map(|e| e.offset),
                })
            })
            .collect::<Result<Vec<_>, LocateError>>()?;

        Ok(StatusReport {
            input: guard.input().to_path_buf(),
            backup: guard.backup().to_path_buf(),
            backup_exists: self.backups.exists(guard.backup()),
            markers: signature.found_in(text),
            run_ids: marker::find_run_ids(text),
            targets,
            rewrites: rewrite::builtin_rules()
                .iter()
                .map(|rule| RewriteCheck {
                    rule: rule.name(),
                    description: rule.description(),
                    state: rule.detect(text),
                })
                .collect(),
        })
    }

    /// Target and backup paths a restore of `input` would use.
    ///
    /// The target may be missing; the backup must exist.
    pub fn restore_paths(&self, input: &Path) -> Result<(PathBuf, PathBuf), PatchError> {
        let guard = TargetGuard::for_restore(input, |p| self.backups.backup_path_for(p))?;
        if !self.backups.exists(guard.backup()) {
            return Err(PatchError::NoBackup(guard.backup().to_path_buf()));
        }
        Ok((guard.input().to_path_buf(), guard.backup().to_path_buf()))
    }

    /// Put the backup content back onto `input`, recreating it if it was
    /// deleted. Returns the backup path.
    pub fn restore(&self, input: &Path) -> Result<PathBuf, PatchError> {
        let (target, backup) = self.restore_paths(input)?;
        self.backups.restore(&backup, &target)?;
        Ok(backup)
    }
}
