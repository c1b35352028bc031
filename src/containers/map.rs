//! String-keyed view over every `name.{subkey}` in the store.

use std::collections::BTreeSet;

use super::{Binding, Container};
use crate::error::KbResult;
use crate::knowledge::{KnowledgeBase, UpdateSettings};
use crate::record::{Record, Value};

/// Map of subkeys under a common prefix.
///
/// The subkey list is a cache: entries created by peers show up after
/// [`Map::sync`].
#[derive(Debug, Clone)]
pub struct Map {
    binding: Binding,
    keys: BTreeSet<String>,
}

impl Map {
    /// Bind to `name` and load the subkeys already present.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name.
    pub fn new(kb: &KnowledgeBase, name: &str) -> KbResult<Self> {
        let mut map = Self {
            binding: Binding::bind(kb, name, UpdateSettings::default())?,
            keys: BTreeSet::new(),
        };
        map.sync()?;
        Ok(map)
    }

    /// Write policy for entry updates.
    pub fn set_settings(&mut self, settings: UpdateSettings) {
        self.binding.set_settings(settings);
    }

    /// Reload the subkey cache from the store. Returns the entry count.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the map has no live store.
    pub fn sync(&mut self) -> KbResult<usize> {
        let prefix = self.binding.key("");
        let keys = self.binding.access(|vars| {
            let snapshot = vars.to_map(&format!("{prefix}*"))?;
            Ok(snapshot
                .into_keys()
                .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
                .collect::<BTreeSet<_>>())
        })?;
        self.keys = keys;
        Ok(self.keys.len())
    }

    /// Cached subkeys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }

    /// Cached entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Entry `subkey`, uninitialized if absent.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the map has no live store.
    pub fn get(&self, subkey: &str) -> KbResult<Record> {
        self.binding.access(|vars| Ok(vars.get(&self.binding.key(subkey))))
    }

    /// True if `subkey` holds a value in the store.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the map has no live store.
    pub fn exists(&self, subkey: &str) -> KbResult<bool> {
        self.binding.access(|vars| Ok(vars.exists(&self.binding.key(subkey))))
    }

    /// Write entry `subkey` and add it to the cache.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `subkey` contains a wildcard.
    pub fn set(&mut self, subkey: &str, value: impl Into<Value>) -> KbResult<()> {
        let value = value.into();
        self.binding.access(|vars| {
            vars.set_with(&self.binding.key(subkey), value, self.binding.settings())?;
            Ok(())
        })?;
        self.keys.insert(subkey.to_string());
        Ok(())
    }
}

impl Container for Map {
    fn name(&self) -> &str {
        self.binding.name()
    }

    fn modify(&self) -> KbResult<()> {
        self.binding.access(|vars| {
            for subkey in &self.keys {
                vars.mark_modified(&self.binding.key(subkey));
            }
            Ok(())
        })
    }

    fn is_true(&self) -> KbResult<bool> {
        if self.keys.is_empty() {
            return Ok(false);
        }
        self.binding.access(|vars| {
            Ok(self
                .keys
                .iter()
                .all(|subkey| vars.get(&self.binding.key(subkey)).is_true()))
        })
    }

    fn debug_info(&self) -> KbResult<String> {
        self.binding.access(|vars| {
            let entries: Vec<String> = self
                .keys
                .iter()
                .map(|subkey| format!("{subkey}={}", vars.get(&self.binding.key(subkey)).to_string_value()))
                .collect();
            Ok(format!("Map {} {{{}}}", self.binding.name(), entries.join(", ")))
        })
    }

    fn ensure_bound(&self) -> KbResult<()> {
        self.binding.store().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_sync_picks_up_foreign_entries() {
        let kb = KnowledgeBase::new();
        let mut map = Map::new(&kb, "agents").unwrap();
        assert!(map.is_empty());
        map.set("alpha", 1).unwrap();
        kb.update("agents.beta", Record::new(2).with_clock(1)).unwrap();
        kb.set("agentsx", 9).unwrap();
        assert_eq!(map.keys(), vec!["alpha".to_string()]);
        assert_eq!(map.sync().unwrap(), 2);
        assert_eq!(map.keys(), vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(map.get("beta").unwrap().to_integer(), 2);
        assert!(map.is_true().unwrap());
    }

    #[test]
    fn test_map_modify_and_truth() {
        let kb = KnowledgeBase::new();
        let mut map = Map::new(&kb, "m").unwrap();
        assert!(!map.is_true().unwrap());
        map.set("a", 1).unwrap();
        map.set("b", 0).unwrap();
        assert!(!map.is_true().unwrap());
        kb.clear_modifieds().unwrap();
        map.modify().unwrap();
        assert_eq!(kb.modifieds().unwrap().len(), 2);
        assert!(map.set("bad*", 1).is_err());
        assert!(map.debug_info().unwrap().contains("a=1"));
    }
}
