//! Idempotency detection.
//!
//! A text counts as already patched when it contains any literal that only
//! inserted snippets produce. Substring containment is enough: the markers
//! carry tokens unlikely to exist in an unpatched bundle, and a false positive
//! only costs an operator confirmation.

use crate::catalog::PatchCatalog;
use crate::session;
use regex::Regex;
use std::sync::LazyLock;

/// Opening of the per-run stamp comment appended to every insertion.
pub const RUN_STAMP_PREFIX: &str = "/*entry-patcher:";

static RUN_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/\*entry-patcher:([0-9a-f-]{36})\*/").expect("run stamp pattern is valid")
});

/// Stamp comment for a run, with a leading space.
pub fn run_stamp(run_id: &str) -> String {
    format!(" {RUN_STAMP_PREFIX}{run_id}*/")
}

/// Run identifiers of every well-formed stamp in `text`, in order of
/// appearance, without duplicates.
pub fn find_run_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in RUN_STAMP.captures_iter(text) {
        let id = &caps[1];
        if session::is_session_id(id) && !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Set of literals whose presence means "already patched".
///
/// Computed from a catalog on demand; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSignature {
    markers: Vec<&'static str>,
}

impl PatchSignature {
    /// Keep the catalog's candidate markers that actually occur in at least
    /// one of its snippets or tails, plus the run stamp prefix.
    pub fn from_catalog(catalog: &PatchCatalog) -> Self {
        let mut markers: Vec<&'static str> = catalog
            .markers()
            .iter()
            .copied()
            .filter(|marker| {
                catalog.targets().iter().any(|target| {
                    target.session_tail.contains(marker)
                        || target.snippets.iter().any(|(_, text)| text.contains(marker))
                })
            })
            .collect();
        markers.push(RUN_STAMP_PREFIX);
        Self { markers }
    }

    pub fn markers(&self) -> &[&'static str] {
        &self.markers
    }

    /// Markers present in `text`.
    pub fn found_in(&self, text: &str) -> Vec<&'static str> {
        self.markers
            .iter()
            .copied()
            .filter(|marker| text.contains(marker))
            .collect()
    }

    pub fn is_already_patched(&self, text: &str) -> bool {
        self.markers.iter().any(|marker| text.contains(marker))
    }
}
