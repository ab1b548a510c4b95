//! Text snapshots, the insertion primitive, and atomic file writes.

use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Immutable snapshot of the target text.
///
/// Mutation produces a new `SourceText`; offsets are only ever computed
/// against the snapshot they are applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    text: String,
}

impl SourceText {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read a whole file as UTF-8.
    pub fn read(path: &Path) -> Result<Self, EditError> {
        let bytes = fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|e| EditError::Utf8(e.utf8_error()))?;
        Ok(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Apply `insertion`, producing the next snapshot.
    pub fn with_insertion(&self, insertion: &Insertion) -> Result<SourceText, EditError> {
        insertion.validate(&self.text)?;

        let mut next = String::with_capacity(self.text.len() + insertion.text.len());
        next.push_str(&self.text[..insertion.offset]);
        next.push_str(&insertion.text);
        next.push_str(&self.text[insertion.offset..]);
        Ok(SourceText { text: next })
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl From<String> for SourceText {
    fn from(text: String) -> Self {
        Self { text }
    }
}

/// Verification strategy for the text an insertion is anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (faster for large spans)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }

    fn expected_len(&self) -> Option<usize> {
        match self {
            EditVerification::ExactMatch(expected) => Some(expected.len()),
            EditVerification::Hash(_) => None,
        }
    }
}

/// Pure insertion at a byte offset, verified against the text that must
/// immediately precede it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Insertion does nothing until applied to a SourceText"]
pub struct Insertion {
    /// Byte offset the text is inserted at
    pub offset: usize,
    /// Text to insert
    pub text: String,
    /// Start of the anchor span `[anchor_start, offset)`
    pub anchor_start: usize,
    /// What the anchor span must contain
    pub anchor: EditVerification,
}

impl Insertion {
    /// Insert `text` at `offset`, requiring `anchor` to end exactly there.
    pub fn new(offset: usize, text: impl Into<String>, anchor: &str) -> Self {
        Self {
            offset,
            text: text.into(),
            anchor_start: offset.saturating_sub(anchor.len()),
            anchor: EditVerification::from_text(anchor),
        }
    }

    fn validate(&self, content: &str) -> Result<(), EditError> {
        if self.anchor_start > self.offset || self.offset > content.len() {
            return Err(EditError::InvalidOffset {
                offset: self.offset,
                len: content.len(),
            });
        }

        if !content.is_char_boundary(self.offset) || !content.is_char_boundary(self.anchor_start)
        {
            return Err(EditError::NotCharBoundary {
                offset: self.offset,
            });
        }

        let found = &content[self.anchor_start..self.offset];
        let length_ok = self
            .anchor
            .expected_len()
            .map_or(true, |len| len == self.offset - self.anchor_start);
        if !length_ok || !self.anchor.matches(found) {
            return Err(EditError::AnchorMismatch {
                offset: self.offset,
                expected: format!("{:?}", self.anchor),
                found: found.to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Anchor verification failed before offset {offset}")]
    AnchorMismatch {
        offset: usize,
        expected: String,
        found: String,
    },

    #[error("Invalid insertion offset {offset} in text of length {len}")]
    InvalidOffset { offset: usize, len: usize },

    #[error("Offset {offset} is not on a UTF-8 character boundary")]
    NotCharBoundary { offset: usize },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 validation error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full content lands at `path` or the previous file is untouched.
/// An existing file keeps its permissions.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(path) {
        temp.as_file().set_permissions(meta.permissions())?;
    }
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
