//! Non-locking view over a store, handed to code already inside its exclusive
//! section (triggers, containers, wait predicates).

use std::collections::BTreeMap;

use super::context::Context;
use super::pattern::KeyPattern;
use super::settings::UpdateSettings;
use crate::error::KbResult;
use crate::record::{Record, Value, WriteOutcome};

/// Store access without taking the lock.
///
/// Writes made through a `Variables` view mark keys dirty but neither fire
/// triggers nor flush transports.
pub struct Variables<'a> {
    ctx: &'a mut Context,
}

impl<'a> Variables<'a> {
    pub(crate) fn new(ctx: &'a mut Context) -> Self {
        Self { ctx }
    }

    /// Current record, or an uninitialized one.
    #[must_use]
    pub fn get(&self, key: &str) -> Record {
        self.ctx.get(key)
    }

    /// True if `key` holds an initialized value.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.ctx.exists(key)
    }

    /// Write with default settings.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or wildcard keys.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> KbResult<WriteOutcome> {
        self.ctx.set(key, value.into(), &UpdateSettings::default())
    }

    /// Write with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or wildcard keys.
    pub fn set_with(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        settings: &UpdateSettings,
    ) -> KbResult<WriteOutcome> {
        self.ctx.set(key, value.into(), settings)
    }

    /// Add `delta` to the integer view of `key`, returning the stored result.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or wildcard keys.
    pub fn inc(&mut self, key: &str, delta: i64, settings: &UpdateSettings) -> KbResult<i64> {
        self.ctx.inc(key, delta, settings)
    }

    /// Queue `key` for re-send. Returns false for absent or local keys.
    pub fn mark_modified(&mut self, key: &str) -> bool {
        self.ctx.mark_modified(key)
    }

    /// True if `key` is in the dirty set.
    #[must_use]
    pub fn is_dirty(&self, key: &str) -> bool {
        self.ctx.is_dirty(key)
    }

    /// Snapshot of keys matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed patterns.
    pub fn to_map(&self, pattern: &str) -> KbResult<BTreeMap<String, Record>> {
        Ok(self.ctx.to_map(&KeyPattern::parse(pattern)?))
    }

    /// Store Lamport clock.
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.ctx.clock()
    }

    /// Remove `key`.
    pub fn delete(&mut self, key: &str) -> bool {
        self.ctx.delete(key)
    }
}
