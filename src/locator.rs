//! Function-entry location by tolerant pattern matching.
//!
//! No grammar awareness: the first textual match wins, even if it sits in a
//! comment or string literal. Parameter lists containing `)` never match.

use crate::cache;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("async {function} function not found")]
    NotFound { function: String },

    #[error("'{function}' is not a plain identifier")]
    InvalidName { function: String },

    #[error("invalid signature pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Where a target function's body begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionEntry {
    /// Byte offset of the `async` keyword
    pub signature_start: usize,
    /// Byte offset immediately after the opening brace
    pub offset: usize,
}

impl FunctionEntry {
    /// The matched `async name(...) {` text.
    pub fn signature<'a>(&self, text: &'a str) -> &'a str {
        &text[self.signature_start..self.offset]
    }
}

/// Locate the first `async <function_name>(...) {` in `text`.
///
/// Returns [`LocateError::NotFound`] when there is no match; whether that is
/// fatal is the caller's decision.
pub fn locate(text: &str, function_name: &str) -> Result<FunctionEntry, LocateError> {
    find(text, function_name)?.ok_or_else(|| LocateError::NotFound {
        function: function_name.to_string(),
    })
}

/// Like [`locate`], but a missing function is `Ok(None)`.
pub fn find(text: &str, function_name: &str) -> Result<Option<FunctionEntry>, LocateError> {
    if !is_identifier(function_name) {
        return Err(LocateError::InvalidName {
            function: function_name.to_string(),
        });
    }

    let pattern = cache::get_or_compile(function_name)?;
    let entry = pattern.find(text).map(|m| FunctionEntry {
        signature_start: m.start(),
        offset: m.end(),
    });

    match &entry {
        Some(e) => tracing::debug!(
            function = function_name,
            offset = e.offset,
            "located function entry"
        ),
        None => tracing::debug!(function = function_name, "function entry not found"),
    }

    Ok(entry)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
