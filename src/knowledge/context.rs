//! The unsynchronized store state guarded by the knowledge base's lock.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use tracing::{debug, trace};

use super::pattern::{validate_key, KeyPattern};
use super::settings::{KnowledgeBaseConfig, UpdateSettings};
use super::triggers::TriggerTable;
use crate::error::KbResult;
use crate::record::{Record, Toggles, Value, WriteOutcome};

/// Keys changed since a flush, in first-change order.
#[derive(Debug, Clone, Default)]
pub(crate) struct DirtySet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl DirtySet {
    pub(crate) fn insert(&mut self, key: &str) -> bool {
        if self.members.contains(key) {
            return false;
        }
        self.members.insert(key.to_string());
        self.order.push(key.to_string());
        true
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        if self.members.remove(key) {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub(crate) fn drain(&mut self) -> Vec<String> {
        self.members.clear();
        std::mem::take(&mut self.order)
    }

    pub(crate) fn keys(&self) -> &[String] {
        &self.order
    }
}

fn is_local(key: &str, record: &Record) -> bool {
    key.starts_with('.') || record.toggles.local_only
}

#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub(crate) config: KnowledgeBaseConfig,
    records: BTreeMap<String, Record>,
    modifieds: DirtySet,
    checkpoint: DirtySet,
    clock: u64,
    pub(crate) triggers: TriggerTable,
}

impl Context {
    pub(crate) fn new(config: KnowledgeBaseConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
            modifieds: DirtySet::default(),
            checkpoint: DirtySet::default(),
            clock: 0,
            triggers: TriggerTable::default(),
        }
    }

    /// Copy of the data: records, dirty sets and clock. Triggers stay behind.
    pub(crate) fn deep_copy(&self, config: KnowledgeBaseConfig) -> Self {
        Self {
            config,
            records: self.records.clone(),
            modifieds: self.modifieds.clone(),
            checkpoint: self.checkpoint.clone(),
            clock: self.clock,
            triggers: TriggerTable::default(),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Record {
        self.records.get(key).cloned().unwrap_or_default()
    }

    pub(crate) fn peek(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub(crate) fn exists(&self, key: &str) -> bool {
        self.records.get(key).is_some_and(Record::exists)
    }

    pub(crate) const fn clock(&self) -> u64 {
        self.clock
    }

    pub(crate) fn observe_clock(&mut self, clock: u64) {
        self.clock = self.clock.max(clock);
    }

    pub(crate) fn set(
        &mut self,
        key: &str,
        value: Value,
        settings: &UpdateSettings,
    ) -> KbResult<WriteOutcome> {
        validate_key(key)?;
        let increment = settings
            .clock_increment
            .unwrap_or(self.config.clock_increment);
        let quality = settings.quality.unwrap_or(self.config.default_quality);

        let entry = self.records.entry(key.to_string()).or_default();
        let clock = entry.clock.saturating_add(increment);
        if !entry.accepts(clock, quality, settings.always_overwrite) {
            debug!(
                key,
                quality,
                current_quality = entry.quality,
                "discarded local write"
            );
            return Ok(WriteOutcome::Discarded);
        }

        entry.set_value(value);
        entry.clock = clock;
        entry.quality = quality;
        let local = settings.treat_globals_as_locals || is_local(key, entry);
        if !local {
            entry.toggles.modified = true;
            self.modifieds.insert(key);
        }
        self.clock = self.clock.max(clock);
        self.checkpoint.insert(key);
        Ok(WriteOutcome::Accepted)
    }

    /// Apply a record that carries its own clock and quality.
    pub(crate) fn update(
        &mut self,
        key: &str,
        incoming: Record,
        always_overwrite: bool,
    ) -> KbResult<WriteOutcome> {
        validate_key(key)?;
        self.clock = self.clock.max(incoming.clock);

        if let Some(current) = self.records.get_mut(key) {
            if !current.accepts(incoming.clock, incoming.quality, always_overwrite) {
                trace!(
                    key,
                    clock = incoming.clock,
                    current_clock = current.clock,
                    quality = incoming.quality,
                    current_quality = current.quality,
                    "discarded stale update"
                );
                return Ok(WriteOutcome::Discarded);
            }
            let toggles = current.toggles;
            *current = incoming;
            current.toggles = toggles;
        } else {
            let mut record = incoming;
            record.toggles = Toggles::default();
            self.records.insert(key.to_string(), record);
        }
        self.checkpoint.insert(key);
        Ok(WriteOutcome::Accepted)
    }

    pub(crate) fn inc(&mut self, key: &str, delta: i64, settings: &UpdateSettings) -> KbResult<i64> {
        let next = self.get(key).to_integer().saturating_add(delta);
        self.set(key, Value::Integer(next), settings)?;
        Ok(self.get(key).to_integer())
    }

    pub(crate) fn delete(&mut self, key: &str) -> bool {
        self.modifieds.remove(key);
        self.checkpoint.remove(key);
        self.records.remove(key).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.modifieds.clear();
        self.checkpoint.clear();
    }

    pub(crate) fn set_local_only(&mut self, key: &str, local: bool) -> KbResult<()> {
        validate_key(key)?;
        let record = self.records.entry(key.to_string()).or_default();
        record.toggles.local_only = local;
        if local {
            record.toggles.modified = false;
            self.modifieds.remove(key);
        }
        Ok(())
    }

    /// Queue an existing, replicated key for re-send without touching its value.
    pub(crate) fn mark_modified(&mut self, key: &str) -> bool {
        match self.records.get_mut(key) {
            Some(record) if record.exists() && !is_local(key, record) => {
                record.toggles.modified = true;
                self.modifieds.insert(key);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_dirty(&self, key: &str) -> bool {
        self.modifieds.contains(key)
    }

    pub(crate) fn modified_keys(&self) -> Vec<String> {
        self.modifieds.keys().to_vec()
    }

    /// Drain the dirty set into an outbound batch, in first-change order.
    pub(crate) fn take_modifieds(&mut self) -> Vec<(String, Record)> {
        let keys = self.modifieds.drain();
        let mut batch = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.records.get_mut(&key) {
                record.toggles.modified = false;
                batch.push((key, record.clone()));
            }
        }
        batch
    }

    pub(crate) fn clear_modifieds(&mut self) {
        for key in self.modifieds.drain() {
            if let Some(record) = self.records.get_mut(&key) {
                record.toggles.modified = false;
            }
        }
    }

    /// Records changed since the previous checkpoint.
    pub(crate) fn checkpoint_records(&mut self, reset: bool) -> Vec<(String, Record)> {
        let batch = self
            .checkpoint
            .keys()
            .iter()
            .filter_map(|k| self.records.get(k).map(|r| (k.clone(), r.clone())))
            .collect();
        if reset {
            self.checkpoint.clear();
        }
        batch
    }

    pub(crate) fn to_map(&self, pattern: &KeyPattern) -> BTreeMap<String, Record> {
        let matches = |(k, _): &(&String, &Record)| pattern.matches(k);
        match pattern.literal_prefix() {
            Some(prefix) => self
                .records
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix))
                .filter(matches)
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect(),
            None => self
                .records
                .iter()
                .filter(matches)
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect(),
        }
    }

    pub(crate) fn range(&self, prefix: &str, suffix: &str) -> BTreeMap<String, Record> {
        self.records
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| k.len() >= prefix.len() + suffix.len() && k.ends_with(suffix))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<(String, Record)> {
        self.records
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }
}
