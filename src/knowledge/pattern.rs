//! Key patterns for snapshot queries and trigger subscriptions.
//!
//! `*` matches any run of characters. A single trailing `*` is a prefix
//! query and a single leading `*` a suffix query; anything else with a
//! wildcard compiles to an anchored regex.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

use crate::error::{KbError, KbResult, ValidationError};

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

fn cached_regex(pattern: &str) -> KbResult<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| KbError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let source = format!(
        "^{}$",
        pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*")
    );
    let compiled = Regex::new(&source).map_err(|e| ValidationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut guard = cache
        .write()
        .map_err(|_| KbError::internal("regex cache lock poisoned"))?;
    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }
    Ok(guard
        .entry(pattern.to_string())
        .or_insert(compiled)
        .clone())
}

/// A parsed key pattern.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Matches every key.
    All,
    /// Matches one key.
    Exact(String),
    /// `stem*`
    Prefix(String),
    /// `*stem`
    Suffix(String),
    /// Anything with interior wildcards.
    Wildcard(Regex),
}

impl KeyPattern {
    /// Parse a pattern.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyKey` for an empty pattern.
    pub fn parse(pattern: &str) -> KbResult<Self> {
        if pattern.is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        let stars = pattern.matches('*').count();
        let parsed = match stars {
            0 => Self::Exact(pattern.to_string()),
            _ if pattern.chars().all(|c| c == '*') => Self::All,
            1 if pattern.ends_with('*') => Self::Prefix(pattern.trim_end_matches('*').to_string()),
            1 if pattern.starts_with('*') => {
                Self::Suffix(pattern.trim_start_matches('*').to_string())
            }
            _ => Self::Wildcard(cached_regex(pattern)?),
        };
        Ok(parsed)
    }

    /// True if `key` matches.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(k) => k == key,
            Self::Prefix(p) => key.starts_with(p.as_str()),
            Self::Suffix(s) => key.ends_with(s.as_str()),
            Self::Wildcard(re) => re.is_match(key),
        }
    }

    /// Literal prefix every match starts with, for range scans.
    #[must_use]
    pub fn literal_prefix(&self) -> Option<&str> {
        match self {
            Self::Exact(k) | Self::Prefix(k) => Some(k),
            _ => None,
        }
    }
}

/// Reject keys that cannot be written: empty ones and wildcards.
pub(crate) fn validate_key(key: &str) -> KbResult<()> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey.into());
    }
    if key.contains('*') {
        return Err(ValidationError::PatternKey {
            key: key.to_string(),
        }
        .into());
    }
    Ok(())
}
