//! Replicated ring buffer with independent reader cursors.
//!
//! Layout for a buffer named `name` with capacity `n`:
//!
//! ```text
//! name.size     capacity n
//! name.index    absolute position of the newest record, -1 when empty
//! name.0 ..     ring slots; absolute position p lives in name.{p mod n}
//! ```
//!
//! The producer publishes slots and index in one exclusive section, so a
//! flush always carries both.

use super::{Binding, Container};
use crate::error::{KbResult, ValidationError};
use crate::knowledge::{KnowledgeBase, UpdateSettings, Variables};
use crate::record::{Record, Value};

const INDEX: &str = "index";
const SIZE: &str = "size";

fn read_index(binding: &Binding, vars: &Variables<'_>) -> i64 {
    let record = vars.get(&binding.key(INDEX));
    if record.exists() {
        record.to_integer()
    } else {
        -1
    }
}

fn published_size(binding: &Binding, vars: &Variables<'_>) -> KbResult<usize> {
    usize::try_from(vars.get(&binding.key(SIZE)).to_integer())
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ValidationError::ZeroCapacity.into())
}

#[allow(clippy::cast_possible_wrap)]
const fn signed(n: usize) -> i64 {
    n as i64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn slot(binding: &Binding, position: i64, capacity: usize) -> String {
    binding.key(position.rem_euclid(signed(capacity)) as usize)
}

/// Number of positions still held by the ring.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn window(index: i64, capacity: usize) -> usize {
    (index + 1).clamp(0, signed(capacity)) as usize
}

/// Producer side of a ring buffer.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    binding: Binding,
    capacity: usize,
}

impl CircularBuffer {
    /// Create or take over the buffer `name` with `capacity` slots and
    /// publish the capacity.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name or zero capacity.
    pub fn new(kb: &KnowledgeBase, name: &str, capacity: usize) -> KbResult<Self> {
        let mut buffer = Self {
            binding: Binding::bind(kb, name, UpdateSettings::default())?,
            capacity: 0,
        };
        buffer.resize(signed(capacity))?;
        Ok(buffer)
    }

    /// Attach to an existing buffer, adopting its published capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroCapacity`] if no capacity is published.
    pub fn attach(kb: &KnowledgeBase, name: &str) -> KbResult<Self> {
        let mut buffer = Self {
            binding: Binding::bind(kb, name, UpdateSettings::default())?,
            capacity: 0,
        };
        buffer.resize(-1)?;
        Ok(buffer)
    }

    /// Write policy for slot and index updates.
    pub fn set_settings(&mut self, settings: UpdateSettings) {
        self.binding.set_settings(settings);
    }

    /// Change capacity and publish it. A negative `length` adopts the
    /// capacity currently published in the store.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroCapacity`] for zero, or for a negative
    /// length when nothing is published.
    pub fn resize(&mut self, length: i64) -> KbResult<()> {
        if length == 0 {
            return Err(ValidationError::ZeroCapacity.into());
        }
        let capacity = self.binding.access(|vars| {
            if length < 0 {
                return published_size(&self.binding, vars);
            }
            let capacity = usize::try_from(length).map_err(|_| ValidationError::ZeroCapacity)?;
            vars.set_with(&self.binding.key(SIZE), length, self.binding.settings())?;
            if !vars.exists(&self.binding.key(INDEX)) {
                vars.set_with(&self.binding.key(INDEX), -1, self.binding.settings())?;
            }
            Ok(capacity)
        })?;
        self.capacity = capacity;
        Ok(())
    }

    /// Capacity.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.capacity
    }

    /// Absolute position of the newest record, -1 when empty.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn index(&self) -> KbResult<i64> {
        self.binding.access(|vars| Ok(read_index(&self.binding, vars)))
    }

    /// Records currently held: `min(index + 1, capacity)`.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn count(&self) -> KbResult<usize> {
        Ok(window(self.index()?, self.capacity))
    }

    fn push(&self, vars: &mut Variables<'_>, value: Value) -> KbResult<i64> {
        let next = read_index(&self.binding, vars) + 1;
        vars.set_with(&slot(&self.binding, next, self.capacity), value, self.binding.settings())?;
        vars.set_with(&self.binding.key(INDEX), next, self.binding.settings())?;
        Ok(next)
    }

    /// Append one record, overwriting the oldest when full. Returns its position.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn add(&self, value: impl Into<Value>) -> KbResult<i64> {
        let value = value.into();
        self.binding.access(|vars| self.push(vars, value))
    }

    /// Append several records in one exclusive section. Returns the new index.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn add_many<I, V>(&self, values: I) -> KbResult<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.binding.access(|vars| {
            let mut index = read_index(&self.binding, vars);
            for value in values {
                index = self.push(vars, value.into())?;
            }
            Ok(index)
        })
    }

    /// Newest record; uninitialized when empty.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn get(&self) -> KbResult<Record> {
        self.inspect(0)
    }

    /// Record `position` steps from the newest (0 is newest, -1 the one
    /// before). Positions outside the held window give an uninitialized record.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn inspect(&self, position: i64) -> KbResult<Record> {
        self.binding.access(|vars| {
            let index = read_index(&self.binding, vars);
            let target = index + position;
            let oldest = index + 1 - signed(window(index, self.capacity));
            if target < oldest || target > index {
                return Ok(Record::uninitialized());
            }
            Ok(vars.get(&slot(&self.binding, target, self.capacity)))
        })
    }

    /// Up to `n` of the oldest held records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn get_earliest(&self, n: usize) -> KbResult<Vec<Record>> {
        self.binding.access(|vars| {
            let index = read_index(&self.binding, vars);
            let held = window(index, self.capacity);
            let oldest = index + 1 - signed(held);
            Ok((0..n.min(held))
                .map(|i| vars.get(&slot(&self.binding, oldest + signed(i), self.capacity)))
                .collect())
        })
    }

    /// Up to `n` of the newest held records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn get_latest(&self, n: usize) -> KbResult<Vec<Record>> {
        self.binding.access(|vars| {
            let index = read_index(&self.binding, vars);
            let held = window(index, self.capacity);
            Ok((0..n.min(held))
                .map(|i| vars.get(&slot(&self.binding, index - signed(i), self.capacity)))
                .collect())
        })
    }

    /// Reset the index to empty. Slot values are left in place.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the buffer has no live store.
    pub fn clear(&self) -> KbResult<()> {
        self.binding.access(|vars| {
            let settings = self.binding.settings().always_overwrite(true);
            vars.set_with(&self.binding.key(INDEX), -1, &settings)?;
            Ok(())
        })
    }
}

impl Container for CircularBuffer {
    fn name(&self) -> &str {
        self.binding.name()
    }

    fn modify(&self) -> KbResult<()> {
        self.binding.access(|vars| {
            vars.mark_modified(&self.binding.key(SIZE));
            vars.mark_modified(&self.binding.key(INDEX));
            for i in 0..self.capacity {
                vars.mark_modified(&self.binding.key(i));
            }
            Ok(())
        })
    }

    fn is_true(&self) -> KbResult<bool> {
        Ok(self.count()? > 0)
    }

    fn debug_info(&self) -> KbResult<String> {
        let index = self.index()?;
        let records = self.get_earliest(self.capacity)?;
        let values: Vec<String> = records.iter().map(Record::to_string_value).collect();
        Ok(format!(
            "CircularBuffer {} [capacity {}, index {}]: [{}]",
            self.binding.name(),
            self.capacity,
            index,
            values.join(", ")
        ))
    }

    fn ensure_bound(&self) -> KbResult<()> {
        self.binding.store().map(|_| ())
    }
}

/// A reader with its own cursor over a [`CircularBuffer`]'s keys.
///
/// The cursor is the absolute position of the last record consumed, starting
/// at -1. A consumer that falls more than a capacity behind silently skips to
/// the oldest record still held; [`CircularBufferConsumer::dropped`] reports
/// how many were lost.
#[derive(Debug, Clone)]
pub struct CircularBufferConsumer {
    binding: Binding,
    capacity: usize,
    local: i64,
}

impl CircularBufferConsumer {
    /// Attach to the buffer `name`, adopting its published capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroCapacity`] if no capacity is published.
    pub fn new(kb: &KnowledgeBase, name: &str) -> KbResult<Self> {
        let mut consumer = Self {
            binding: Binding::bind(kb, name, UpdateSettings::default())?,
            capacity: 0,
            local: -1,
        };
        consumer.resize()?;
        Ok(consumer)
    }

    /// Re-read the published capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroCapacity`] if no capacity is published.
    pub fn resize(&mut self) -> KbResult<()> {
        self.capacity = self.binding.access(|vars| published_size(&self.binding, vars))?;
        Ok(())
    }

    /// Capacity.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.capacity
    }

    /// Position of the last consumed record.
    #[must_use]
    pub const fn index(&self) -> i64 {
        self.local
    }

    /// Move the cursor by hand.
    pub fn set_index(&mut self, index: i64) {
        self.local = index;
    }

    /// Snap the cursor to the producer's newest record, skipping everything unread.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn resync(&mut self) -> KbResult<()> {
        self.local = self.binding.access(|vars| Ok(read_index(&self.binding, vars)))?;
        Ok(())
    }

    /// Positions between the cursor and the producer's index. A value above
    /// [`CircularBufferConsumer::size`] means the producer has lapped this
    /// consumer and the difference was overwritten.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn remaining(&self) -> KbResult<usize> {
        let index = self.binding.access(|vars| Ok(read_index(&self.binding, vars)))?;
        Ok((index - self.local).max(0) as usize)
    }

    /// Unread records already overwritten by the producer.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn dropped(&self) -> KbResult<usize> {
        let index = self.binding.access(|vars| Ok(read_index(&self.binding, vars)))?;
        Ok(self.overrun(index))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn unread(&self, index: i64) -> usize {
        (index - self.local).clamp(0, signed(self.capacity)) as usize
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn overrun(&self, index: i64) -> usize {
        (index - self.local - signed(self.capacity)).max(0) as usize
    }

    /// Skip past overwritten positions. Returns how many were skipped.
    fn catch_up(&mut self, index: i64) -> usize {
        let lost = self.overrun(index);
        if lost > 0 {
            self.local = index - signed(self.capacity);
        }
        lost
    }

    /// Read and advance by one; `None` when nothing is unread.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn consume(&mut self) -> KbResult<Option<Record>> {
        Ok(self.consume_with_dropped()?.0)
    }

    /// [`CircularBufferConsumer::consume`], also reporting how many records
    /// were lost to overrun before this one.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn consume_with_dropped(&mut self) -> KbResult<(Option<Record>, usize)> {
        let store = self.binding.store()?;
        store.access(|vars| {
            let index = read_index(&self.binding, vars);
            let dropped = self.catch_up(index);
            if self.unread(index) == 0 {
                return Ok((None, dropped));
            }
            self.local += 1;
            Ok((Some(vars.get(&slot(&self.binding, self.local, self.capacity))), dropped))
        })
    }

    /// Up to `n` unread records, oldest first, advancing past them.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn consume_earliest(&mut self, n: usize) -> KbResult<Vec<Record>> {
        let store = self.binding.store()?;
        store.access(|vars| {
            let index = read_index(&self.binding, vars);
            self.catch_up(index);
            let take = n.min(self.unread(index));
            let records = (1..=take)
                .map(|i| vars.get(&slot(&self.binding, self.local + signed(i), self.capacity)))
                .collect();
            self.local += signed(take);
            Ok(records)
        })
    }

    /// Up to `n` of the newest unread records, newest first. The cursor moves
    /// to the producer's index, so older unread records are skipped.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn consume_latest(&mut self, n: usize) -> KbResult<Vec<Record>> {
        let store = self.binding.store()?;
        store.access(|vars| {
            let index = read_index(&self.binding, vars);
            let take = n.min(self.unread(index));
            let records = (0..take)
                .map(|i| vars.get(&slot(&self.binding, index - signed(i), self.capacity)))
                .collect();
            self.local = self.local.max(index);
            Ok(records)
        })
    }

    /// Newest record without moving the cursor; `None` when the buffer is empty.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn peek(&self) -> KbResult<Option<Record>> {
        Ok(self.peek_latest(1)?.into_iter().next())
    }

    /// Up to `n` of the newest held records, newest first, without moving
    /// the cursor.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn peek_latest(&self, n: usize) -> KbResult<Vec<Record>> {
        self.binding.access(|vars| {
            let index = read_index(&self.binding, vars);
            Ok((0..n.min(window(index, self.capacity)))
                .map(|i| vars.get(&slot(&self.binding, index - signed(i), self.capacity)))
                .collect())
        })
    }

    /// Record at `cursor + position` (1 is the next unread record) without
    /// moving the cursor. Positions outside the held window give an
    /// uninitialized record.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the consumer has no live store.
    pub fn inspect(&self, position: i64) -> KbResult<Record> {
        self.binding.access(|vars| {
            let index = read_index(&self.binding, vars);
            let base = self.local.max(index - signed(self.capacity));
            let target = base + position;
            let oldest = index + 1 - signed(window(index, self.capacity));
            if target < oldest || target > index {
                return Ok(Record::uninitialized());
            }
            Ok(vars.get(&slot(&self.binding, target, self.capacity)))
        })
    }
}
