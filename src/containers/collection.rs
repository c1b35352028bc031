//! Heterogeneous group of containers treated as one.

use std::fmt;

use super::Container;
use crate::error::KbResult;

/// A bundle of containers that are re-sent together.
///
/// Useful when an agent wants its whole published state (position, status,
/// task queue) to go out whenever some condition holds.
#[derive(Default)]
pub struct Collection {
    name: String,
    members: Vec<Box<dyn Container>>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("members", &self.members.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Collection {
    /// Empty collection labelled `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Add a member.
    pub fn add(&mut self, container: impl Container + 'static) {
        self.members.push(Box::new(container));
    }

    /// Builder form of [`Collection::add`].
    #[must_use]
    pub fn with(mut self, container: impl Container + 'static) -> Self {
        self.add(container);
        self
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Remove every member.
    pub fn clear(&mut self) {
        self.members.clear();
    }
}

impl Container for Collection {
    fn name(&self) -> &str {
        &self.name
    }

    fn modify(&self) -> KbResult<()> {
        for member in &self.members {
            member.ensure_bound()?;
        }
        self.members.iter().try_for_each(|member| member.modify())
    }

    /// True if every member is true. An empty collection is false.
    fn is_true(&self) -> KbResult<bool> {
        if self.members.is_empty() {
            return Ok(false);
        }
        for member in &self.members {
            if !member.is_true()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn debug_info(&self) -> KbResult<String> {
        let mut out = format!("Collection {} ({} members)", self.name, self.members.len());
        for member in &self.members {
            out.push_str("\n  ");
            out.push_str(&member.debug_info()?);
        }
        Ok(out)
    }

    fn ensure_bound(&self) -> KbResult<()> {
        self.members.iter().try_for_each(|member| member.ensure_bound())
    }

    /// Evaluates `predicate` once, then checks every member is bound before
    /// modifying any of them.
    fn modify_if_true(&self, predicate: &dyn Container) -> KbResult<bool> {
        if !predicate.is_true()? {
            return Ok(false);
        }
        self.modify()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{Barrier, Counter, Integer, Vector};
    use crate::error::{ExecutionError, KbError};
    use crate::knowledge::KnowledgeBase;

    #[test]
    fn test_modify_if_true_requeues_all_members() {
        let kb = KnowledgeBase::new();
        let flag = Integer::new(&kb, "ready").unwrap();
        let counter = Counter::new(&kb, "c", 0, 1).unwrap();
        counter.inc().unwrap();
        let v = Vector::new(&kb, "v", Some(1)).unwrap();
        v.set(0, 5).unwrap();
        let group = Collection::new("state").with(counter).with(v);
        assert_eq!(group.len(), 2);

        kb.clear_modifieds().unwrap();
        assert!(!group.modify_if_true(&flag).unwrap());
        assert!(kb.modifieds().unwrap().is_empty());

        flag.set(1).unwrap();
        kb.clear_modifieds().unwrap();
        assert!(group.modify_if_true(&flag).unwrap());
        let mut dirty = kb.modifieds().unwrap();
        dirty.sort();
        assert_eq!(dirty, vec!["c.0", "v.0", "v.size"]);
    }

    #[test]
    fn test_vector_predicate_needs_every_element_true() {
        let kb = KnowledgeBase::new();
        let gate = Vector::new(&kb, "gate", Some(3)).unwrap();
        for (i, v) in [1i64, 0, 1].into_iter().enumerate() {
            gate.set(i, v).unwrap();
        }
        let level = Integer::new(&kb, "level").unwrap();
        level.set(4).unwrap();
        let counter = Counter::new(&kb, "c", 0, 1).unwrap();
        counter.inc().unwrap();
        let group = Collection::new("members").with(level).with(counter);

        kb.clear_modifieds().unwrap();
        assert!(!group.modify_if_true(&gate).unwrap());
        assert!(kb.modifieds().unwrap().is_empty());

        gate.set(1, 1i64).unwrap();
        kb.clear_modifieds().unwrap();
        assert!(group.modify_if_true(&gate).unwrap());
        let mut dirty = kb.modifieds().unwrap();
        dirty.sort();
        assert_eq!(dirty, vec!["c.0", "level"]);
    }

    #[test]
    fn test_released_member_stops_modify_before_any_write() {
        let kb = KnowledgeBase::new();
        let other = KnowledgeBase::new();
        let live = Integer::new(&kb, "a").unwrap();
        live.set(1).unwrap();
        let doomed = Barrier::new(&other, "b", 0, 1).unwrap();
        drop(other);
        let group = Collection::new("g").with(live).with(doomed);

        kb.clear_modifieds().unwrap();
        let err = group.modify().unwrap_err();
        assert!(matches!(err, KbError::Execution(ExecutionError::Released { .. })));
        assert!(kb.modifieds().unwrap().is_empty());
    }

    #[test]
    fn test_truth_and_clear() {
        let kb = KnowledgeBase::new();
        let mut group = Collection::new("g");
        assert!(group.is_false().unwrap());
        let a = Integer::new(&kb, "a").unwrap();
        a.set(2).unwrap();
        group.add(a);
        assert!(group.is_true().unwrap());
        assert!(group.debug_info().unwrap().contains("Integer a = 2"));
        group.clear();
        assert!(group.is_empty());
    }
}
