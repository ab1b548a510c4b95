//! Thread-local cache of compiled signature patterns.
//!
//! The applier re-locates every target after each insertion, so the same
//! pattern is requested several times per run. Compiled regexes are cached
//! per thread, keyed by function name, capped at 256 entries; the cache is
//! cleared when full.

use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    static PATTERN_CACHE: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

/// Source of the tolerant signature pattern for `function_name`.
///
/// Matches `async <name>(<params>) {` with arbitrary whitespace. The parameter
/// list may not contain `)`, so nested parentheses (default values calling
/// functions, destructuring with parens) do not match.
pub fn signature_pattern(function_name: &str) -> String {
    format!(r"async\s+{}\s*\([^)]*\)\s*\{{", regex::escape(function_name))
}

/// Get the compiled signature pattern for `function_name`, compiling and
/// caching it on first use.
pub fn get_or_compile(function_name: &str) -> Result<Regex, regex::Error> {
    PATTERN_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();

        if let Some(re) = cache.get(function_name) {
            tracing::trace!(function = function_name, "signature pattern cache hit");
            return Ok(re.clone());
        }

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }

        let compiled = Regex::new(&signature_pattern(function_name))?;
        cache.insert(function_name.to_string(), compiled.clone());
        Ok(compiled)
    })
}

/// Clear the pattern cache (mainly for testing).
pub fn clear_cache() {
    PATTERN_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Number of cached patterns on this thread.
pub fn cache_size() -> usize {
    PATTERN_CACHE.with(|cache| cache.borrow().len())
}
