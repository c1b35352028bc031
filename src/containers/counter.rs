//! Distributed counter: one slot per participant, value is the sum.

use super::{validate_ring, Binding, Container};
use crate::error::KbResult;
use crate::knowledge::{KnowledgeBase, UpdateSettings, Variables};

/// Aggregating counter over `name.0 .. name.{size-1}`.
///
/// Each participant only writes its own slot, so concurrent increments from
/// different agents never conflict.
#[derive(Debug, Clone)]
pub struct Counter {
    binding: Binding,
    id: usize,
    size: usize,
}

impl Counter {
    /// Bind to `name` as participant `id` of `size`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name or ring identity.
    pub fn new(kb: &KnowledgeBase, name: &str, id: usize, size: usize) -> KbResult<Self> {
        validate_ring(id, size)?;
        Ok(Self {
            binding: Binding::bind(kb, name, UpdateSettings::default())?,
            id,
            size,
        })
    }

    /// Rebind to another store or base key, keeping the ring identity.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name.
    pub fn set_name(&mut self, kb: &KnowledgeBase, name: &str) -> KbResult<()> {
        self.binding = Binding::bind(kb, name, *self.binding.settings())?;
        Ok(())
    }

    /// Write policy for slot updates.
    pub fn set_settings(&mut self, settings: UpdateSettings) {
        self.binding.set_settings(settings);
    }

    /// This participant's id.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Number of participants.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Change which slot is ours. Existing slot values are kept.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `id` is not below `size`.
    pub fn resize(&mut self, id: usize, size: usize) -> KbResult<()> {
        validate_ring(id, size)?;
        self.id = id;
        self.size = size;
        Ok(())
    }

    fn total(&self, vars: &Variables<'_>) -> i64 {
        (0..self.size)
            .map(|i| vars.get(&self.binding.key(i)).to_integer())
            .fold(0i64, i64::saturating_add)
    }

    fn add(&self, delta: i64) -> KbResult<i64> {
        self.binding.access(|vars| {
            vars.inc(&self.binding.key(self.id), delta, self.binding.settings())?;
            Ok(self.total(vars))
        })
    }

    /// Add one to our slot and return the new total.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    pub fn inc(&self) -> KbResult<i64> {
        self.add(1)
    }

    /// Add `delta` to our slot and return the new total.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    pub fn inc_by(&self, delta: i64) -> KbResult<i64> {
        self.add(delta)
    }

    /// Subtract one from our slot and return the new total.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    pub fn dec(&self) -> KbResult<i64> {
        self.add(-1)
    }

    /// Subtract `delta` from our slot and return the new total.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    pub fn dec_by(&self, delta: i64) -> KbResult<i64> {
        self.add(delta.saturating_neg())
    }

    /// Sum of every slot, including peers' replicated slots.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    pub fn get(&self) -> KbResult<i64> {
        self.binding.access(|vars| Ok(self.total(vars)))
    }

    /// Alias of [`Counter::get`].
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    pub fn to_integer(&self) -> KbResult<i64> {
        self.get()
    }

    /// The total as a double.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_double(&self) -> KbResult<f64> {
        Ok(self.get()? as f64)
    }

    /// Adjust our slot so the visible total equals `total`.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the counter has no live store.
    pub fn set(&self, total: i64) -> KbResult<i64> {
        self.binding.access(|vars| {
            let key = self.binding.key(self.id);
            let own = vars.get(&key).to_integer();
            let others = self.total(vars).saturating_sub(own);
            vars.set_with(&key, total.saturating_sub(others), self.binding.settings())?;
            Ok(self.total(vars))
        })
    }
}

impl Container for Counter {
    fn name(&self) -> &str {
        self.binding.name()
    }

    fn modify(&self) -> KbResult<()> {
        self.binding.access(|vars| {
            vars.mark_modified(&self.binding.key(self.id));
            Ok(())
        })
    }

    fn is_true(&self) -> KbResult<bool> {
        Ok(self.get()? != 0)
    }

    fn debug_info(&self) -> KbResult<String> {
        self.binding.access(|vars| {
            let slots: Vec<String> = (0..self.size)
                .map(|i| vars.get(&self.binding.key(i)).to_string_value())
                .collect();
            Ok(format!(
                "Counter {} [id {} of {}]: total {} slots [{}]",
                self.binding.name(),
                self.id,
                self.size,
                self.total(vars),
                slots.join(", ")
            ))
        })
    }

    fn ensure_bound(&self) -> KbResult<()> {
        self.binding.store().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn test_counter_sums_slots() {
        let kb = KnowledgeBase::new();
        let counter = Counter::new(&kb, "hits", 1, 3).unwrap();
        assert_eq!(counter.inc().unwrap(), 1);
        kb.update("hits.0", Record::new(5).with_clock(1)).unwrap();
        kb.update("hits.2", Record::new(2).with_clock(1)).unwrap();
        assert_eq!(counter.get().unwrap(), 8);
        assert_eq!(counter.dec_by(3).unwrap(), 5);
        assert_eq!(kb.get("hits.1").unwrap().to_integer(), -2);
        assert!(kb.is_dirty("hits.1").unwrap());
        assert!(!kb.is_dirty("hits.0").unwrap());
    }

    #[test]
    fn test_counter_set_adjusts_own_slot() {
        let kb = KnowledgeBase::new();
        kb.update("c.0", Record::new(10).with_clock(1)).unwrap();
        let counter = Counter::new(&kb, "c", 1, 2).unwrap();
        assert_eq!(counter.set(4).unwrap(), 4);
        assert_eq!(kb.get("c.1").unwrap().to_integer(), -6);
        assert!((counter.to_double().unwrap() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counter_resize_keeps_values() {
        let kb = KnowledgeBase::new();
        let mut counter = Counter::new(&kb, "c", 0, 2).unwrap();
        counter.inc_by(3).unwrap();
        counter.resize(2, 3).unwrap();
        counter.inc().unwrap();
        assert_eq!(counter.get().unwrap(), 4);
        assert!(counter.resize(3, 3).is_err());
        assert_eq!(counter.id(), 2);
    }

    #[test]
    fn test_counter_modify_requeues_slot() {
        let kb = KnowledgeBase::new();
        let counter = Counter::new(&kb, "c", 0, 1).unwrap();
        counter.inc().unwrap();
        kb.clear_modifieds().unwrap();
        counter.modify().unwrap();
        assert_eq!(kb.modifieds().unwrap(), vec!["c.0".to_string()]);
        assert!(counter.is_true().unwrap());
        assert!(counter.debug_info().unwrap().contains("total 1"));
    }
}
