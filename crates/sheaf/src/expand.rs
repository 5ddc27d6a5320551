//! Pattern expander
//!
//! Expands include/exclude entries against the library index into concrete
//! class-id sets. Entries are literal class ids, namespace prefixes, glob
//! patterns (`*`/`?`), or full regular expressions; a `=` prefix marks an
//! entry explicit (forced, closure-exempt).

use std::cell::RefCell;

use anyhow::{Context, Result, bail};
use indexmap::IndexSet;
use log::debug;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::library::LibraryIndex;

/// Split raw entries into (smart, explicit) lists. Explicit entries carry a
/// `=` prefix, which is stripped.
pub fn split_entries(entries: &[String]) -> (Vec<String>, Vec<String>) {
    let mut smart = Vec::new();
    let mut explicit = Vec::new();

    for entry in entries {
        match entry.strip_prefix('=') {
            Some(rest) => explicit.push(rest.to_owned()),
            None => smart.push(entry.clone()),
        }
    }

    (smart, explicit)
}

/// Expands entries against a library index, caching compiled patterns for
/// the lifetime of the run.
#[derive(Debug)]
pub struct PatternExpander<'a> {
    index: &'a LibraryIndex,
    compiled: RefCell<FxHashMap<String, Regex>>,
}

impl<'a> PatternExpander<'a> {
    pub fn new(index: &'a LibraryIndex) -> Self {
        Self {
            index,
            compiled: RefCell::new(FxHashMap::default()),
        }
    }

    /// Expand a list of entries into concrete class ids, deduplicated,
    /// preserving first-seen order.
    ///
    /// An entry expanding to zero classes is a fatal configuration error: a
    /// silently-empty include or exclude would corrupt downstream closure.
    pub fn expand(&self, entries: &[String]) -> Result<Vec<String>> {
        let mut result = IndexSet::new();

        for entry in entries {
            // Fast path: a matching class id found directly.
            if self.index.contains(entry) {
                result.insert(entry.clone());
                continue;
            }

            let regex = self.pattern_for(entry)?;
            let mut matched = 0usize;
            for id in self.index.class_ids() {
                if regex.is_match(id) {
                    result.insert(id.to_owned());
                    matched += 1;
                }
            }

            if matched == 0 {
                bail!("expression gives no results, malformed entry: {entry}");
            }
            debug!("Entry {entry} expanded to {matched} classes");
        }

        Ok(result.into_iter().collect())
    }

    fn pattern_for(&self, entry: &str) -> Result<Regex> {
        if let Some(regex) = self.compiled.borrow().get(entry) {
            return Ok(regex.clone());
        }

        let regex = compile_entry(entry)
            .with_context(|| format!("invalid include/exclude entry: {entry}"))?;
        self.compiled
            .borrow_mut()
            .insert(entry.to_owned(), regex.clone());
        Ok(regex)
    }
}

/// Translate an entry into a matching regex.
///
/// Entries made of id characters plus `*`/`?` use glob semantics, anchored
/// over the whole id; a plain dotted name matches as a namespace prefix.
/// Anything else is taken as a raw regular expression, unanchored.
fn compile_entry(entry: &str) -> Result<Regex> {
    let is_globlike = entry
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '*' | '?'));

    if !is_globlike {
        return Regex::new(entry).map_err(Into::into);
    }

    let mut pattern = String::with_capacity(entry.len() + 8);
    pattern.push('^');
    for c in entry.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '.' => pattern.push_str("\\."),
            other => pattern.push(other),
        }
    }

    if entry.contains('*') || entry.contains('?') {
        pattern.push('$');
    } else {
        // Namespace prefix: `app.ui` covers `app.ui.Button` but not
        // `app.uikit.Button`.
        pattern.push_str("(\\.|$)");
    }

    Regex::new(&pattern).map_err(Into::into)
}
