//! Coordination containers.
//!
//! A container is a typed view over a named region of one store: a base key
//! plus fixed suffixes (`.size`, `.index`, ring slot numbers). Containers hold
//! only a weak reference to their store and some cached layout. They never
//! flush on their own; writes mark keys dirty and the owner decides when to
//! call [`KnowledgeBase::send_modifieds`](crate::KnowledgeBase::send_modifieds).
//!
//! Each container does all of its reads and writes for one call inside a
//! single exclusive section, so a multi-key update (ring slot plus index,
//! vector elements plus size) reaches the dirty set together.

mod barrier;
mod circular_buffer;
mod collection;
mod counter;
mod map;
mod scalar;
mod vector;

use std::fmt::Display;

pub use barrier::Barrier;
pub use circular_buffer::{CircularBuffer, CircularBufferConsumer};
pub use collection::Collection;
pub use counter::Counter;
pub use map::Map;
pub use scalar::{Double, Integer, Text};
pub use vector::Vector;

use crate::error::{ExecutionError, KbError, KbResult, ValidationError};
use crate::knowledge::{validate_key, KnowledgeBase, UpdateSettings, Variables, WeakKnowledgeBase};

/// Behaviour shared by every container.
pub trait Container: Send + Sync {
    /// Base key.
    fn name(&self) -> &str;

    /// Queue the container's current values for re-send without changing them.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Unbound`] or [`ExecutionError::Released`]
    /// if the container has no live store.
    fn modify(&self) -> KbResult<()>;

    /// Logical truth of the current value.
    ///
    /// # Errors
    ///
    /// As for [`Container::modify`].
    fn is_true(&self) -> KbResult<bool>;

    /// Negation of [`Container::is_true`].
    ///
    /// # Errors
    ///
    /// As for [`Container::modify`].
    fn is_false(&self) -> KbResult<bool> {
        Ok(!self.is_true()?)
    }

    /// Human-readable dump of the container's keys and values.
    ///
    /// # Errors
    ///
    /// As for [`Container::modify`].
    fn debug_info(&self) -> KbResult<String>;

    /// Fail unless the container is bound to a live store.
    ///
    /// # Errors
    ///
    /// As for [`Container::modify`].
    fn ensure_bound(&self) -> KbResult<()>;

    /// Call [`Container::modify`] if `predicate` is true. Returns whether it did.
    ///
    /// # Errors
    ///
    /// As for [`Container::modify`], for either container.
    fn modify_if_true(&self, predicate: &dyn Container) -> KbResult<bool> {
        if predicate.is_true()? {
            self.modify()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// A container's link to its store.
#[derive(Debug, Clone, Default)]
pub(crate) struct Binding {
    kb: Option<WeakKnowledgeBase>,
    name: String,
    settings: UpdateSettings,
}

impl Binding {
    pub(crate) fn bind(kb: &KnowledgeBase, name: &str, settings: UpdateSettings) -> KbResult<Self> {
        validate_key(name)?;
        Ok(Self {
            kb: Some(kb.downgrade()),
            name: name.to_string(),
            settings,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    pub(crate) fn set_settings(&mut self, settings: UpdateSettings) {
        self.settings = settings;
    }

    pub(crate) fn store(&self) -> KbResult<KnowledgeBase> {
        let weak = self.kb.as_ref().ok_or(ExecutionError::Unbound)?;
        weak.upgrade().ok_or_else(|| {
            KbError::from(ExecutionError::Released {
                name: self.name.clone(),
            })
        })
    }

    pub(crate) fn access<R>(&self, f: impl FnOnce(&mut Variables<'_>) -> KbResult<R>) -> KbResult<R> {
        self.store()?.access(f)
    }

    /// `name.suffix`
    pub(crate) fn key(&self, suffix: impl Display) -> String {
        format!("{}.{suffix}", self.name)
    }
}

/// Check a `(ring id, ring size)` identity.
pub(crate) fn validate_ring(id: usize, size: usize) -> KbResult<()> {
    if size == 0 {
        return Err(ValidationError::ZeroCapacity.into());
    }
    if id >= size {
        return Err(ValidationError::RingIdOutOfRange { id, size }.into());
    }
    Ok(())
}
