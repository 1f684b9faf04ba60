//! Traversal parameters: key ranges and key pattern filters.

use poolkv_core::{ByteSeq, Error, Result};
use regex::bytes::Regex;
use std::ops::Bound;

/// Key range with exclusive bounds on both sides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Only keys strictly greater than this are included
    pub above: Option<ByteSeq>,
    /// Only keys strictly less than this are included
    pub below: Option<ByteSeq>,
}

impl KeyRange {
    /// Every key
    pub fn all() -> Self {
        Self::default()
    }

    /// Keys strictly greater than `key`
    pub fn above(key: impl Into<ByteSeq>) -> Self {
        Self {
            above: Some(key.into()),
            below: None,
        }
    }

    /// Keys strictly less than `key`
    pub fn below(key: impl Into<ByteSeq>) -> Self {
        Self {
            above: None,
            below: Some(key.into()),
        }
    }

    /// Keys strictly between `lo` and `hi`
    pub fn between(lo: impl Into<ByteSeq>, hi: impl Into<ByteSeq>) -> Self {
        Self {
            above: Some(lo.into()),
            below: Some(hi.into()),
        }
    }

    /// Returns true if `key` lies inside the range
    pub fn contains(&self, key: &[u8]) -> bool {
        self.above.as_deref().map_or(true, |lo| key > lo)
            && self.below.as_deref().map_or(true, |hi| key < hi)
    }

    /// Returns true if `key` is at or beyond the upper bound
    pub fn is_past_end(&self, key: &[u8]) -> bool {
        self.below.as_deref().map_or(false, |hi| key >= hi)
    }

    /// Lower bound for an ordered-map range query
    pub fn lower_bound(&self) -> Bound<&[u8]> {
        match self.above.as_deref() {
            Some(lo) => Bound::Excluded(lo),
            None => Bound::Unbounded,
        }
    }

    /// Upper bound for an ordered-map range query
    pub fn upper_bound(&self) -> Bound<&[u8]> {
        match self.below.as_deref() {
            Some(hi) => Bound::Excluded(hi),
            None => Bound::Unbounded,
        }
    }

    /// Returns true if no key can satisfy the range
    pub fn is_empty(&self) -> bool {
        match (self.above.as_deref(), self.below.as_deref()) {
            (Some(lo), Some(hi)) => lo >= hi,
            _ => false,
        }
    }
}

/// Whole-key regular expression filter.
///
/// The pattern must match the entire key: `1234` selects key `1234` but not
/// `12345`. Matching runs on the raw key bytes; `.` matches one UTF-8
/// encoded character, use `(?-u:.)` to match an arbitrary byte.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    pattern: String,
    regex: Regex,
}

impl KeyFilter {
    /// Compile `pattern`; fails with `InvalidPattern`
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as given
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the whole key matches
    pub fn matches(&self, key: &[u8]) -> bool {
        self.regex.is_match(key)
    }
}

/// What a traversal visits: a key range plus an optional key filter.
///
/// The filter is evaluated per key during the traversal itself; keys it
/// rejects are skipped before their values are loaded.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    range: KeyRange,
    filter: Option<KeyFilter>,
}

impl Scan {
    /// Every entry
    pub fn all() -> Self {
        Self::default()
    }

    /// Entries inside `range`
    pub fn range(range: KeyRange) -> Self {
        Self {
            range,
            filter: None,
        }
    }

    /// Restrict to keys matching `filter`
    pub fn with_filter(mut self, filter: KeyFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// The key range
    pub fn key_range(&self) -> &KeyRange {
        &self.range
    }

    /// The key filter, if any
    pub fn filter(&self) -> Option<&KeyFilter> {
        self.filter.as_ref()
    }

    /// Returns true if `key` should be visited
    pub fn admits(&self, key: &[u8]) -> bool {
        self.range.contains(key) && self.filter.as_ref().map_or(true, |f| f.matches(key))
    }
}
