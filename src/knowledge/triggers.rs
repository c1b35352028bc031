//! Named callbacks fired after matching writes.
//!
//! Registration hands back a [`TriggerToken`] scoped to the store that issued
//! it; there is no process-wide table.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pattern::KeyPattern;
use super::variables::Variables;
use crate::error::KbResult;

/// Handle identifying a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerToken(Uuid);

impl TriggerToken {
    /// Create a new random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TriggerToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger body. Runs with the store's exclusive section held.
pub type TriggerFn = dyn Fn(&mut Variables<'_>) -> KbResult<()> + Send + Sync;

#[derive(Clone)]
pub(crate) struct Trigger {
    pub(crate) token: TriggerToken,
    pub(crate) name: String,
    pattern: Option<KeyPattern>,
    pub(crate) callback: Arc<TriggerFn>,
}

impl Trigger {
    pub(crate) fn new(name: String, pattern: Option<KeyPattern>, callback: Arc<TriggerFn>) -> Self {
        Self {
            token: TriggerToken::new(),
            name,
            pattern,
            callback,
        }
    }

    /// Triggers without a pattern only run through an explicit invoke.
    pub(crate) fn fires_for<'a>(&self, mut keys: impl Iterator<Item = &'a str>) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|pattern| keys.any(|k| pattern.matches(k)))
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Registered triggers of one store, in registration order.
#[derive(Debug, Default, Clone)]
pub(crate) struct TriggerTable {
    triggers: Vec<Trigger>,
}

impl TriggerTable {
    pub(crate) fn insert(&mut self, trigger: Trigger) -> TriggerToken {
        let token = trigger.token;
        self.triggers.push(trigger);
        token
    }

    pub(crate) fn remove(&mut self, token: TriggerToken) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.token != token);
        before != self.triggers.len()
    }

    pub(crate) fn by_name(&self, name: &str) -> Vec<Trigger> {
        self.triggers.iter().filter(|t| t.name == name).cloned().collect()
    }

    pub(crate) fn matching(&self, keys: &[String]) -> Vec<Trigger> {
        if keys.is_empty() {
            return Vec::new();
        }
        self.triggers
            .iter()
            .filter(|t| t.fires_for(keys.iter().map(String::as_str)))
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.triggers.len()
    }
}
