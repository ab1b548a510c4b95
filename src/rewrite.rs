//! Fixed find/replace rewrites applied after the entry insertions.
//!
//! Each rule guards itself: when its applied-form marker is already in the
//! text it reports [`RewriteStatus::AlreadyApplied`] and changes nothing. Every
//! pattern carries its surrounding field-access context; none matches a bare
//! numeric literal.

use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;

/// Replacement for one match; `None` leaves the match as it was.
type Substitute = fn(&Captures<'_>) -> Option<String>;

struct Substitution {
    pattern: Regex,
    substitute: Substitute,
}

/// A named rewrite: substitutions tried in order, plus the markers of its
/// applied form.
pub struct RewriteRule {
    name: &'static str,
    description: &'static str,
    substitutions: Vec<Substitution>,
    applied_markers: Vec<Regex>,
    /// Stop after the first substitution that changes anything
    first_match_only: bool,
}

/// Outcome of one rule against one text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RewriteStatus {
    Applied { replacements: usize },
    AlreadyApplied,
    NotFound,
}

/// Read-only state of a rule against a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteState {
    /// Unrewritten form present
    Pending,
    /// Applied-form marker present
    Applied,
    /// Neither form present
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub rule: &'static str,
    pub description: &'static str,
    #[serde(flatten)]
    pub status: RewriteStatus,
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("rewrite pattern is valid")
}

const IDENT: &str = r"[A-Za-z_$][A-Za-z0-9_$]*";

impl RewriteRule {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    fn is_applied(&self, text: &str) -> bool {
        self.applied_markers.iter().any(|m| m.is_match(text))
    }

    fn is_pending(&self, text: &str) -> bool {
        self.substitutions.iter().any(|s| {
            s.pattern
                .captures_iter(text)
                .any(|caps| (s.substitute)(&caps).is_some())
        })
    }

    /// Classify `text` without changing it.
    pub fn detect(&self, text: &str) -> RewriteState {
        if self.is_applied(text) {
            RewriteState::Applied
        } else if self.is_pending(text) {
            RewriteState::Pending
        } else {
            RewriteState::Absent
        }
    }

    /// Apply the rule, returning the new text and what happened.
    pub fn apply(&self, text: &str) -> (String, RewriteStatus) {
        if self.is_applied(text) {
            tracing::debug!(rule = self.name, "rewrite already applied");
            return (text.to_string(), RewriteStatus::AlreadyApplied);
        }

        let mut current = text.to_string();
        let mut replacements = 0;

        for substitution in &self.substitutions {
            let mut count = 0;
            let next = substitution
                .pattern
                .replace_all(&current, |caps: &Captures<'_>| {
                    match (substitution.substitute)(caps) {
                        Some(replacement) => {
                            count += 1;
                            replacement
                        }
                        None => caps[0].to_string(),
                    }
                })
                .into_owned();

            if count > 0 {
                current = next;
                replacements += count;
                if self.first_match_only {
                    break;
                }
            }
        }

        let status = if replacements > 0 {
            tracing::info!(rule = self.name, replacements, "rewrite applied");
            RewriteStatus::Applied { replacements }
        } else {
            tracing::warn!(rule = self.name, "rewrite pattern not found");
            RewriteStatus::NotFound
        };
        (current, status)
    }
}

/// Strips `userId` and `anonymousId` from the telemetry field list.
static IDENTITY_FIELDS: LazyLock<RewriteRule> = LazyLock::new(|| RewriteRule {
    name: "telemetry-identity-fields",
    description: "remove userId and anonymousId from telemetry data",
    substitutions: vec![Substitution {
        pattern: regex(&format!(
            r#"({IDENT})\s*=\s*\["userId",\s*"anonymousId",\s*"timestamp",\s*"messageId"\]"#
        )),
        substitute: |caps| Some(format!(r#"{} = ["timestamp", "messageId"]"#, &caps[1])),
    }],
    applied_markers: vec![regex(&format!(
        r#"{IDENT}\s*=\s*\["timestamp",\s*"messageId"\]"#
    ))],
    first_match_only: true,
});

/// Keeps 401 responses from tearing down the stored auth session.
static AUTH_STATUS: LazyLock<RewriteRule> = LazyLock::new(|| RewriteRule {
    name: "auth-status-401",
    description: "keep the auth session on 401 responses",
    substitutions: vec![
        Substitution {
            pattern: regex(&format!(
                r"({IDENT})\.status === 401 && this\.clientAuth\.removeAuthSession\(\)"
            )),
            substitute: |caps| {
                Some(format!(
                    "{}.status === 999 && this.clientAuth.removeAuthSession()",
                    &caps[1]
                ))
            },
        },
        Substitution {
            pattern: regex(&format!(
                r"\(({IDENT})\.status === 400 \|\| ({IDENT})\.status === 401 \|\| ({IDENT})\.status === 403\)"
            )),
            // all three arms must test the same receiver
            substitute: |caps| {
                (caps[1] == caps[2] && caps[1] == caps[3]).then(|| {
                    format!("({0}.status === 400 || {0}.status === 403)", &caps[1])
                })
            },
        },
        Substitution {
            pattern: regex(&format!(
                r"({IDENT})\.status === 401 && ({IDENT}) && this\._auth\.removeSession\(\)"
            )),
            substitute: |caps| {
                Some(format!(
                    "{}.status === 999 && {} && this._auth.removeSession()",
                    &caps[1], &caps[2]
                ))
            },
        },
        Substitution {
            pattern: regex(&format!(r"({IDENT})\.status===401\b")),
            substitute: |caps| Some(format!("{}.status===999", &caps[1])),
        },
        Substitution {
            pattern: regex(&format!(r"({IDENT})\.status === 401\b")),
            substitute: |caps| Some(format!("{}.status === 999", &caps[1])),
        },
    ],
    applied_markers: vec![
        regex(&format!(r"{IDENT}\.status ?=== ?999\b")),
        // triple check with the 401 arm dropped
        regex(&format!(
            r"\(({IDENT})\.status === 400 \|\| ({IDENT})\.status === 403\)"
        )),
    ],
    first_match_only: false,
});

/// The fixed rule set, in application order.
pub fn builtin_rules() -> [&'static RewriteRule; 2] {
    [&*IDENTITY_FIELDS, &*AUTH_STATUS]
}

/// Apply every builtin rule in order.
pub fn apply_all(text: &str) -> (String, Vec<RewriteReport>) {
    let mut current = text.to_string();
    let mut reports = Vec::new();
    for rule in builtin_rules() {
        let (next, status) = rule.apply(&current);
        current = next;
        reports.push(RewriteReport {
            rule: rule.name(),
            description: rule.description(),
            status,
        });
    }
    (current, reports)
}
