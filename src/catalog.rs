//! Compiled-in patch catalog.
//!
//! Maps each [`PatchMode`] to one insertion snippet per [`TargetFunction`].
//! This is pure data: the applier selects from it, nothing here touches text
//! or the file system.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Literal substrings that only ever appear in inserted snippets.
///
/// [`crate::marker::PatchSignature`] keeps the ones actually present in a
/// catalog's snippets.
pub const BUILTIN_MARKERS: &[&str] = &[
    r#"startsWith("report-")"#,
    r#"startsWith("record-")"#,
    "randSessionId",
    r#"this._userAgent = """#,
];

/// Named behavior selecting which snippet is inserted into each target.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PatchMode {
    Block,
    #[default]
    Random,
    Empty,
    Stealth,
    Debug,
}

impl PatchMode {
    pub const ALL: [PatchMode; 5] = [
        PatchMode::Block,
        PatchMode::Random,
        PatchMode::Empty,
        PatchMode::Stealth,
        PatchMode::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PatchMode::Block => "block",
            PatchMode::Random => "random",
            PatchMode::Empty => "empty",
            PatchMode::Stealth => "stealth",
            PatchMode::Debug => "debug",
        }
    }

    /// One-line description of what the mode does to telemetry calls.
    pub fn description(self) -> &'static str {
        match self {
            PatchMode::Block => "Complete telemetry blocking - no data sent",
            PatchMode::Random => "Random fake data sent - server receives meaningless data",
            PatchMode::Empty => "Empty data sent - minimal payload",
            PatchMode::Stealth => "Stealth mode - sends realistic but fake telemetry data",
            PatchMode::Debug => "Debug mode - logs each intercepted telemetry call, then blocks it",
        }
    }
}

impl fmt::Display for PatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        PatchMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| CatalogError::unknown_mode(s))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid patch mode '{name}'{hint}")]
    UnknownMode { name: String, hint: String },

    #[error("target '{target}' has no snippet for mode '{mode}'")]
    MissingSnippet { target: String, mode: PatchMode },

    #[error("target '{target}' has {count} snippets for mode '{mode}', expected exactly 1")]
    DuplicateSnippet {
        target: String,
        mode: PatchMode,
        count: usize,
    },

    #[error("catalog declares no mandatory target function")]
    NoPrimaryTarget,
}

impl CatalogError {
    fn unknown_mode(name: &str) -> Self {
        let available: Vec<&str> = PatchMode::ALL.iter().map(|m| m.as_str()).collect();
        let suggestion = PatchMode::ALL
            .iter()
            .map(|m| (m.as_str(), strsim::jaro_winkler(&name.to_ascii_lowercase(), m.as_str())))
            .filter(|(_, score)| *score >= 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(m, _)| m);

        let hint = match suggestion {
            Some(m) => format!(" (did you mean '{m}'?); available modes: {}", available.join(", ")),
            None => format!("; available modes: {}", available.join(", ")),
        };

        CatalogError::UnknownMode {
            name: name.to_string(),
            hint,
        }
    }
}

/// A function in the target text whose entry point receives a snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFunction {
    /// Plain identifier following the `async` keyword
    pub name: &'static str,
    /// Mandatory targets abort the run when missing; optional ones are skipped
    pub required: bool,
    /// Base behavioral override per mode
    pub snippets: &'static [(PatchMode, &'static str)],
    /// Session-identifier randomization appended to every base snippet
    pub session_tail: &'static str,
}

impl TargetFunction {
    /// Number of snippets declared for `mode`.
    pub fn snippet_count(&self, mode: PatchMode) -> usize {
        self.snippets.iter().filter(|(m, _)| *m == mode).count()
    }

    /// Base snippet for `mode`, if declared.
    pub fn snippet(&self, mode: PatchMode) -> Option<&'static str> {
        self.snippets
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, text)| *text)
    }

    /// Full insertion text: base snippet followed by the session tail.
    pub fn insertion(&self, mode: PatchMode) -> Result<String, CatalogError> {
        let base = self.snippet(mode).ok_or_else(|| CatalogError::MissingSnippet {
            target: self.name.to_string(),
            mode,
        })?;
        Ok(format!("{base}{}", self.session_tail))
    }
}

/// Immutable mapping from mode to snippet per target, in patch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCatalog {
    targets: Vec<TargetFunction>,
    markers: Vec<&'static str>,
}

impl PatchCatalog {
    /// Build a catalog. Targets are patched in the order given.
    pub fn new(targets: Vec<TargetFunction>, markers: Vec<&'static str>) -> Self {
        Self { targets, markers }
    }

    /// The compiled-in catalog: `callApi` (mandatory) then `callApiStream`.
    pub fn builtin() -> Self {
        Self::new(
            vec![
                TargetFunction {
                    name: "callApi",
                    required: true,
                    snippets: CALL_API_SNIPPETS,
                    session_tail: CALL_API_SESSION_TAIL,
                },
                TargetFunction {
                    name: "callApiStream",
                    required: false,
                    snippets: CALL_API_STREAM_SNIPPETS,
                    session_tail: CALL_API_STREAM_SESSION_TAIL,
                },
            ],
            BUILTIN_MARKERS.to_vec(),
        )
    }

    pub fn targets(&self) -> &[TargetFunction] {
        &self.targets
    }

    /// Candidate idempotency markers declared with this catalog.
    pub fn markers(&self) -> &[&'static str] {
        &self.markers
    }

    /// First mandatory target; the run is meaningless without it.
    pub fn primary(&self) -> Option<&TargetFunction> {
        self.targets.iter().find(|t| t.required)
    }

    /// Reject `mode` unless every target declares exactly one snippet for it.
    pub fn validate_mode(&self, mode: PatchMode) -> Result<(), CatalogError> {
        if self.primary().is_none() {
            return Err(CatalogError::NoPrimaryTarget);
        }

        for target in &self.targets {
            match target.snippet_count(mode) {
                1 => {}
                0 => {
                    return Err(CatalogError::MissingSnippet {
                        target: target.name.to_string(),
                        mode,
                    })
                }
                count => {
                    return Err(CatalogError::DuplicateSnippet {
                        target: target.name.to_string(),
                        mode,
                        count,
                    })
                }
            }
        }
        Ok(())
    }

    /// Modes this catalog fully supports.
    pub fn supported_modes(&self) -> Vec<PatchMode> {
        PatchMode::ALL
            .into_iter()
            .filter(|mode| self.validate_mode(*mode).is_ok())
            .collect()
    }
}

impl Default for PatchCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// In the minified bundle `s` is callApi's endpoint argument and `i` its payload.
const CALL_API_SNIPPETS: &[(PatchMode, &str)] = &[
    (
        PatchMode::Block,
        r#"if (typeof s === "string" && (s.startsWith("report-") || s.startsWith("record-"))) { return { success: true }; }"#,
    ),
    (
        PatchMode::Random,
        r#"if (typeof s === "string" && (s.startsWith("report-") || s.startsWith("record-"))) { i = { timestamp: Date.now(), version: Math.random().toString(36).substring(2, 8) }; }"#,
    ),
    (
        PatchMode::Empty,
        r#"if (typeof s === "string" && (s.startsWith("report-") || s.startsWith("record-"))) { i = {}; }"#,
    ),
    (
        PatchMode::Stealth,
        r#"if (typeof s === "string" && (s.startsWith("report-") || s.startsWith("record-"))) { i = { timestamp: Date.now(), session: Math.random().toString(36).substring(2, 10), events: [] }; }"#,
    ),
    (
        PatchMode::Debug,
        r#"if (typeof s === "string" && (s.startsWith("report-") || s.startsWith("record-"))) { console.debug("[entry-patcher] intercepted", s); return { success: true }; }"#,
    ),
];

// callApiStream takes the endpoint as `n` and the payload as `s`.
const CALL_API_STREAM_SNIPPETS: &[(PatchMode, &str)] = &[
    (
        PatchMode::Block,
        r#"if (typeof n === "string" && (n.startsWith("report-") || n.startsWith("record-"))) { return (async function*() { yield { success: true }; })(); }"#,
    ),
    (
        PatchMode::Random,
        r#"if (typeof n === "string" && (n.startsWith("report-") || n.startsWith("record-"))) { s = { timestamp: Date.now(), version: Math.random().toString(36).substring(2, 8) }; }"#,
    ),
    (
        PatchMode::Empty,
        r#"if (typeof n === "string" && (n.startsWith("report-") || n.startsWith("record-"))) { s = {}; }"#,
    ),
    (
        PatchMode::Stealth,
        r#"if (typeof n === "string" && (n.startsWith("report-") || n.startsWith("record-"))) { s = { timestamp: Date.now(), session: Math.random().toString(36).substring(2, 10), events: [] }; }"#,
    ),
    (
        PatchMode::Debug,
        r#"if (typeof n === "string" && (n.startsWith("report-") || n.startsWith("record-"))) { console.debug("[entry-patcher] intercepted", n); return (async function*() { yield { success: true }; })(); }"#,
    ),
];

const CALL_API_SESSION_TAIL: &str = r#" const chars = "0123456789abcdef"; let randSessionId = ""; for (let i = 0; i < 36; i++) { randSessionId += i === 8 || i === 13 || i === 18 || i === 23 ? "-" : i === 14 ? "4" : i === 19 ? chars[8 + Math.floor(4 * Math.random())] : chars[Math.floor(16 * Math.random())]; } this.sessionId = randSessionId; this._userAgent = "";"#;

// Separate names so both tails can live in one bundle scope.
const CALL_API_STREAM_SESSION_TAIL: &str = r#" const chars2 = "0123456789abcdef"; let randSessionId2 = ""; for (let j = 0; j < 36; j++) { randSessionId2 += j === 8 || j === 13 || j === 18 || j === 23 ? "-" : j === 14 ? "4" : j === 19 ? chars2[8 + Math.floor(4 * Math.random())] : chars2[Math.floor(16 * Math.random())]; } this.sessionId = randSessionId2; this._userAgent = "";"#;
