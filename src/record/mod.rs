//! Records: a value plus the replication metadata that travels with it.

mod any;
mod value;

pub use any::{AnyRegistry, AnyValue};
pub use value::{TypeMask, Value};

use serde::{Deserialize, Serialize};

/// Per-record flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Toggles {
    /// Never replicated, regardless of key.
    #[serde(default)]
    pub local_only: bool,
    /// Queued for the next outbound batch.
    #[serde(default)]
    pub modified: bool,
}

/// Result of applying a write through the conflict rule.
///
/// Discarding is a normal outcome; callers that do not care may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The incoming value replaced the stored one.
    Accepted,
    /// The stored value was newer or of higher quality.
    Discarded,
}

impl WriteOutcome {
    /// True for [`WriteOutcome::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// A typed value with its clock, quality and toggles.
///
/// # Examples
///
/// ```
/// use swarmkb::Record;
///
/// let current = Record::new(5).with_clock(3);
/// assert!(current.accepts(3, 0, false));
/// assert!(!current.accepts(2, 0, false));
/// assert!(current.accepts(1, 1, false));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    value: Value,
    /// Logical version.
    pub clock: u64,
    /// Write priority; higher quality wins regardless of clock.
    pub quality: u32,
    /// Local-only and modified flags.
    #[serde(default)]
    pub toggles: Toggles,
}

impl Record {
    /// Create a record with clock 0 and quality 0.
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// The "absent" record returned for unknown keys.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Set the clock.
    #[must_use]
    pub const fn with_clock(mut self, clock: u64) -> Self {
        self.clock = clock;
        self
    }

    /// Set the quality.
    #[must_use]
    pub const fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    /// Mark the record as local-only.
    #[must_use]
    pub const fn local(mut self) -> Self {
        self.toggles.local_only = true;
        self
    }

    /// The current value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Replace the value, keeping metadata.
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    /// Consume into the value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// True unless uninitialized.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !self.value.is_uninitialized()
    }

    /// Conflict rule: should an incoming `(clock, quality)` replace `self`?
    #[must_use]
    pub const fn accepts(&self, clock: u64, quality: u32, always_overwrite: bool) -> bool {
        always_overwrite
            || quality > self.quality
            || (quality == self.quality && clock >= self.clock)
    }

    /// See [`Value::type_mask`].
    #[must_use]
    pub const fn type_mask(&self) -> TypeMask {
        self.value.type_mask()
    }

    /// See [`Value::to_integer`].
    #[must_use]
    pub fn to_integer(&self) -> i64 {
        self.value.to_integer()
    }

    /// See [`Value::to_double`].
    #[must_use]
    pub fn to_double(&self) -> f64 {
        self.value.to_double()
    }

    /// String rendering of the value.
    #[must_use]
    pub fn to_string_value(&self) -> String {
        self.value.to_string()
    }

    /// See [`Value::to_integer_array`].
    #[must_use]
    pub fn to_integer_array(&self) -> Vec<i64> {
        self.value.to_integer_array()
    }

    /// See [`Value::to_double_array`].
    #[must_use]
    pub fn to_double_array(&self) -> Vec<f64> {
        self.value.to_double_array()
    }

    /// See [`Value::to_bytes`].
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_bytes()
    }

    /// See [`Value::is_true`].
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.value.is_true()
    }

    /// Negation of [`Record::is_true`].
    #[must_use]
    pub fn is_false(&self) -> bool {
        !self.value.is_true()
    }

    /// See [`Value::size`].
    #[must_use]
    pub fn size(&self) -> usize {
        self.value.size()
    }

    /// See [`Value::is_file_type`].
    #[must_use]
    pub const fn is_file_type(&self) -> bool {
        self.value.is_file_type()
    }
}

impl<T: Into<Value>> From<T> for Record {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
