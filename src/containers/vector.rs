//! Fixed-length replicated array: `name.size` plus `name.0 .. name.{size-1}`.

use super::{Binding, Container};
use crate::error::{KbResult, ValidationError};
use crate::knowledge::{KnowledgeBase, UpdateSettings, Variables};
use crate::record::{Record, Value};

const SIZE: &str = "size";

/// Element-per-key vector.
#[derive(Debug, Clone)]
pub struct Vector {
    binding: Binding,
    len: usize,
}

impl Vector {
    /// Bind to `name`. With `Some(len)` the length is published; with `None`
    /// the published `name.size` is adopted (0 if absent).
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name.
    pub fn new(kb: &KnowledgeBase, name: &str, len: Option<usize>) -> KbResult<Self> {
        let mut vector = Self {
            binding: Binding::bind(kb, name, UpdateSettings::default())?,
            len: 0,
        };
        vector.resize(len)?;
        Ok(vector)
    }

    /// Write policy for element updates.
    pub fn set_settings(&mut self, settings: UpdateSettings) {
        self.binding.set_settings(settings);
    }

    /// Publish a new length, or re-read the published one with `None`.
    /// Elements past a shrunk length are left in the store.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the vector has no live store.
    pub fn resize(&mut self, len: Option<usize>) -> KbResult<()> {
        self.len = self.binding.access(|vars| {
            let key = self.binding.key(SIZE);
            match len {
                Some(len) => {
                    let published = i64::try_from(len).map_err(|_| ValidationError::InvalidSettings {
                        reason: format!("vector length {len} out of range"),
                    })?;
                    vars.set_with(&key, published, self.binding.settings())?;
                    Ok(len)
                }
                None => Ok(usize::try_from(vars.get(&key).to_integer()).unwrap_or(0)),
            }
        })?;
        Ok(())
    }

    /// Cached length.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if the length is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, index: usize) -> KbResult<String> {
        if index >= self.len {
            return Err(ValidationError::IndexOutOfRange { index, len: self.len }.into());
        }
        Ok(self.binding.key(index))
    }

    /// Element `index`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `index` is past the end.
    pub fn get(&self, index: usize) -> KbResult<Record> {
        let key = self.check(index)?;
        self.binding.access(|vars| Ok(vars.get(&key)))
    }

    /// Overwrite element `index`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `index` is past the end.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> KbResult<()> {
        let key = self.check(index)?;
        let value = value.into();
        self.binding.access(|vars| {
            vars.set_with(&key, value, self.binding.settings())?;
            Ok(())
        })
    }

    fn elements(&self, vars: &Variables<'_>) -> Vec<Record> {
        (0..self.len).map(|i| vars.get(&self.binding.key(i))).collect()
    }

    /// Every element in order.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the vector has no live store.
    pub fn to_records(&self) -> KbResult<Vec<Record>> {
        self.binding.access(|vars| Ok(self.elements(vars)))
    }

    /// Re-queue element `index` only.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `index` is past the end.
    pub fn modify_index(&self, index: usize) -> KbResult<()> {
        let key = self.check(index)?;
        self.binding.access(|vars| {
            vars.mark_modified(&key);
            Ok(())
        })
    }
}

impl Container for Vector {
    fn name(&self) -> &str {
        self.binding.name()
    }

    fn modify(&self) -> KbResult<()> {
        self.binding.access(|vars| {
            vars.mark_modified(&self.binding.key(SIZE));
            for i in 0..self.len {
                vars.mark_modified(&self.binding.key(i));
            }
            Ok(())
        })
    }

    fn is_true(&self) -> KbResult<bool> {
        let elements = self.to_records()?;
        Ok(!elements.is_empty() && elements.iter().all(Record::is_true))
    }

    fn debug_info(&self) -> KbResult<String> {
        let values: Vec<String> = self.to_records()?.iter().map(Record::to_string_value).collect();
        Ok(format!("Vector {} [{}]: [{}]", self.binding.name(), self.len, values.join(", ")))
    }

    fn ensure_bound(&self) -> KbResult<()> {
        self.binding.store().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_publishes_size_and_elements() {
        let kb = KnowledgeBase::new();
        let v = Vector::new(&kb, "pos", Some(3)).unwrap();
        assert_eq!(kb.get("pos.size").unwrap().to_integer(), 3);
        v.set(0, 1.0).unwrap();
        v.set(2, 3.0).unwrap();
        assert!(v.set(3, 0.0).is_err());
        assert!(!v.is_true().unwrap());
        v.set(1, 2.0).unwrap();
        assert!(v.is_true().unwrap());
        assert!((v.get(2).unwrap().to_double() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_vector_adopts_published_length() {
        let kb = KnowledgeBase::new();
        Vector::new(&kb, "v", Some(4)).unwrap();
        let other = Vector::new(&kb, "v", None).unwrap();
        assert_eq!(other.len(), 4);
        let empty = Vector::new(&kb, "none", None).unwrap();
        assert!(empty.is_empty());
        assert!(!empty.is_true().unwrap());
    }

    #[test]
    fn test_modify_index_requeues_one_element() {
        let kb = KnowledgeBase::new();
        let v = Vector::new(&kb, "v", Some(2)).unwrap();
        v.set(0, 1).unwrap();
        v.set(1, 1).unwrap();
        kb.clear_modifieds().unwrap();
        v.modify_index(1).unwrap();
        assert_eq!(kb.modifieds().unwrap(), vec!["v.1".to_string()]);
    }

    #[test]
    fn test_element_reassignment_keeps_type() {
        let kb = KnowledgeBase::new();
        let v = Vector::new(&kb, "mixed", Some(3)).unwrap();
        v.set(0, 7).unwrap();
        v.set(1, 2.25).unwrap();
        v.set(2, "north").unwrap();
        let before = v.to_records().unwrap();
        for (i, record) in before.iter().enumerate() {
            v.set(i, record.value().clone()).unwrap();
        }
        let after = v.to_records().unwrap();
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.value(), new.value());
            assert_eq!(old.type_mask(), new.type_mask());
        }
    }
}
