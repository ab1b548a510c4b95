//! Entry Patcher: function-entry instrumentation for bundled JavaScript
//!
//! Inserts a mode-specific snippet at the entry point of named `async`
//! functions in a single large script, then applies a small set of fixed
//! textual rewrites. Each run backs the original up next to it first.
//!
//! # Architecture
//!
//! Every change compiles down to an [`Insertion`]: text placed at a byte
//! offset, verified against the signature that must end there. Locating the
//! offset is the [`locator`]'s job; choosing the text is the [`catalog`]'s.
//! [`PatchApplier`] sequences them and owns all file I/O.
//!
//! # Safety
//!
//! - The whole patched text is computed before anything is written
//! - The backup is written and read back before the target is touched
//! - Atomic file writes (tempfile + fsync + rename)
//! - A failed commit restores from the backup, and a failed restore is
//!   reported as its own condition
//! - UTF-8 validation
//!
//! # Example
//!
//! ```no_run
//! use entry_patcher::{ApplyOptions, FixedAnswer, PatchApplier, PatchMode, RunOutcome};
//! use std::path::Path;
//!
//! let applier = PatchApplier::default();
//! let options = ApplyOptions {
//!     mode: PatchMode::Block,
//!     ..ApplyOptions::default()
//! };
//!
//! match applier.run(Path::new("out/extension.js"), &options, &mut FixedAnswer(true)) {
//!     Ok(RunOutcome::Completed(report)) => println!("patched {} functions", report.patched_functions()),
//!     Ok(RunOutcome::Cancelled { gate }) => println!("cancelled at {gate:?}"),
//!     Err(e) => eprintln!("patch failed: {e}"),
//! }
//! ```

pub mod applier;
pub mod backup;
pub mod cache;
pub mod catalog;
pub mod edit;
pub mod locator;
pub mod marker;
pub mod rewrite;
pub mod safety;
pub mod session;

// Re-exports
pub use applier::{
    ApplyOptions, CommitWriter, Confirmation, FixedAnswer, Gate, GateKind, PatchApplier,
    PatchError, PatchReport, PatchedText, RewriteCheck, RunOutcome, StatusReport,
    TargetLocation, TargetReport, TargetStatus,
};
pub use backup::{BackupError, BackupManager, BACKUP_SUFFIX};
pub use catalog::{CatalogError, PatchCatalog, PatchMode, TargetFunction};
pub use edit::{EditError, EditVerification, Insertion, SourceText};
pub use locator::{FunctionEntry, LocateError};
pub use marker::PatchSignature;
pub use rewrite::{RewriteReport, RewriteState, RewriteStatus};
pub use safety::{SafetyError, TargetGuard};
