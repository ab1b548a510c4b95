//! Engine-level integration tests.
//!
//! Every test drives `PatchApplier::run` against scratch files in a temp
//! directory and then inspects the file system directly.

mod apply_flow;
mod failures;

use entry_patcher::{ApplyOptions, PatchMode, PatchReport, RunOutcome};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Minified-style bundle with both target functions and both rewrite sites.
pub const BUNDLE: &str = concat!(
    r#"var t=["userId", "anonymousId", "timestamp", "messageId"];"#,
    "class A{async callApi(s,i,n){return this.fetch(s,i,n)}",
    "async callApiStream(s,i){const r=await this.fetch(s,i);",
    "if(r.status === 401 && this.clientAuth.removeAuthSession())throw r;return r}}"
);

/// Write `content` as `extension.js` in a fresh temp directory.
pub fn setup_bundle(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("extension.js");
    fs::write(&file, content).unwrap();
    (dir, file)
}

pub fn backup_of(file: &Path) -> PathBuf {
    file.with_file_name("extension_ori.js")
}

pub fn options(mode: PatchMode) -> ApplyOptions {
    ApplyOptions {
        mode,
        ..ApplyOptions::default()
    }
}

pub fn completed(outcome: RunOutcome) -> Box<PatchReport> {
    match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Cancelled { gate } => panic!("run cancelled at {gate:?}"),
    }
}

/// Sorted file names in `dir`.
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
