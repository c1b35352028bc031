//! Record, aggregate and buffer filters.
//!
//! Record filters see one record at a time and may rewrite or drop it; they
//! are registered against a [`TypeMask`] so a chain can target e.g. only
//! integers. Aggregate filters see the whole batch. Buffer filters transform
//! the encoded body bytes (compression, obfuscation) and must be reversible.

use std::fmt;
use std::sync::Arc;

use super::context::TransportContext;
use crate::error::TransportError;
use crate::record::{Record, TypeMask};

/// Per-record transform. Returning `None` drops the record.
pub trait RecordFilter: Send + Sync {
    /// Filter one record stored under `key`.
    fn filter(&self, key: &str, record: Record, context: &TransportContext) -> Option<Record>;
}

impl<F> RecordFilter for F
where
    F: Fn(&str, Record, &TransportContext) -> Option<Record> + Send + Sync,
{
    fn filter(&self, key: &str, record: Record, context: &TransportContext) -> Option<Record> {
        self(key, record, context)
    }
}

/// Whole-batch transform; may add, change or remove entries.
pub trait AggregateFilter: Send + Sync {
    /// Filter the batch in place.
    fn filter(&self, batch: &mut RecordBatch, context: &TransportContext);
}

impl<F> AggregateFilter for F
where
    F: Fn(&mut RecordBatch, &TransportContext) + Send + Sync,
{
    fn filter(&self, batch: &mut RecordBatch, context: &TransportContext) {
        self(batch, context);
    }
}

/// Reversible byte-level transform over the packet body.
pub trait BufferFilter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Outbound transform.
    ///
    /// # Errors
    ///
    /// Implementations report failures as `SerializationFailed`.
    fn encode(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Inverse of [`BufferFilter::encode`].
    ///
    /// # Errors
    ///
    /// Implementations report failures as `DeserializationFailed`.
    fn decode(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// Ordered key/record pairs moving through a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    entries: Vec<(String, Record)>,
}

impl RecordBatch {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record under `key`. Replacement keeps position.
    pub fn insert(&mut self, key: impl Into<String>, record: Record) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = record;
        } else {
            self.entries.push((key, record));
        }
    }

    /// Remove and return the record under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Record> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// The record under `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    /// Keep entries for which `f` returns true.
    pub fn retain(&mut self, mut f: impl FnMut(&str, &Record) -> bool) {
        self.entries.retain(|(k, r)| f(k, r));
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in batch order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.entries.iter().map(|(k, r)| (k.as_str(), r))
    }

    /// Keys in batch order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub(crate) fn entries(&self) -> &[(String, Record)] {
        &self.entries
    }

    /// Consume into the underlying pairs.
    #[must_use]
    pub fn into_inner(self) -> Vec<(String, Record)> {
        self.entries
    }
}

impl From<Vec<(String, Record)>> for RecordBatch {
    fn from(entries: Vec<(String, Record)>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, Record)> for RecordBatch {
    fn from_iter<I: IntoIterator<Item = (String, Record)>>(iter: I) -> Self {
        let mut batch = Self::new();
        for (k, r) in iter {
            batch.insert(k, r);
        }
        batch
    }
}

/// Record filters keyed by type mask, applied in registration order.
#[derive(Clone, Default)]
pub struct FilterChain {
    entries: Vec<(TypeMask, Arc<dyn RecordFilter>)>,
}

impl FilterChain {
    /// Append a filter for records whose type intersects `mask`.
    pub fn add(&mut self, mask: TypeMask, filter: impl RecordFilter + 'static) {
        self.entries.push((mask, Arc::new(filter)));
    }

    /// Number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no filter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of filters that would run for records of kind `mask`.
    #[must_use]
    pub fn count_for(&self, mask: TypeMask) -> usize {
        self.entries.iter().filter(|(m, _)| m.intersects(mask)).count()
    }

    /// Run the chain over one record. Stops at the first drop.
    pub fn apply(&self, key: &str, record: Record, context: &TransportContext) -> Option<Record> {
        let mut current = record;
        for (mask, filter) in &self.entries {
            if !mask.intersects(current.type_mask()) {
                continue;
            }
            current = filter.filter(key, current, context)?;
        }
        Some(current)
    }

    /// Run the chain over a batch, dropping filtered records.
    pub fn apply_all(&self, batch: Vec<(String, Record)>, context: &TransportContext) -> RecordBatch {
        if self.is_empty() {
            return RecordBatch::from(batch);
        }
        batch
            .into_iter()
            .filter_map(|(key, record)| {
                let kept = self.apply(&key, record, context);
                kept.map(|r| (key, r))
            })
            .collect()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(m, _)| m.bits()))
            .finish()
    }
}

/// All filters of one transport. Runtime-only; never serialized.
#[derive(Clone, Default)]
pub struct FilterSet {
    /// Per-record filters on outbound batches.
    pub send: FilterChain,
    /// Per-record filters on inbound batches.
    pub receive: FilterChain,
    /// Per-record filters on forwarded batches.
    pub rebroadcast: FilterChain,
    send_aggregate: Vec<Arc<dyn AggregateFilter>>,
    receive_aggregate: Vec<Arc<dyn AggregateFilter>>,
    rebroadcast_aggregate: Vec<Arc<dyn AggregateFilter>>,
    buffer: Vec<Arc<dyn BufferFilter>>,
}

impl FilterSet {
    /// Add a send filter for `mask`.
    pub fn add_send_filter(&mut self, mask: TypeMask, filter: impl RecordFilter + 'static) {
        self.send.add(mask, filter);
    }

    /// Add a receive filter for `mask`.
    pub fn add_receive_filter(&mut self, mask: TypeMask, filter: impl RecordFilter + 'static) {
        self.receive.add(mask, filter);
    }

    /// Add a rebroadcast filter for `mask`.
    pub fn add_rebroadcast_filter(&mut self, mask: TypeMask, filter: impl RecordFilter + 'static) {
        self.rebroadcast.add(mask, filter);
    }

    /// Add an aggregate send filter.
    pub fn add_send_aggregate_filter(&mut self, filter: impl AggregateFilter + 'static) {
        self.send_aggregate.push(Arc::new(filter));
    }

    /// Add an aggregate receive filter.
    pub fn add_receive_aggregate_filter(&mut self, filter: impl AggregateFilter + 'static) {
        self.receive_aggregate.push(Arc::new(filter));
    }

    /// Add an aggregate rebroadcast filter.
    pub fn add_rebroadcast_aggregate_filter(&mut self, filter: impl AggregateFilter + 'static) {
        self.rebroadcast_aggregate.push(Arc::new(filter));
    }

    /// Append a buffer filter. Decoding runs the chain in reverse.
    pub fn add_buffer_filter(&mut self, filter: impl BufferFilter + 'static) {
        self.buffer.push(Arc::new(filter));
    }

    pub(crate) fn aggregate(&self, operation: super::Operation) -> &[Arc<dyn AggregateFilter>] {
        match operation {
            super::Operation::Sending => &self.send_aggregate,
            super::Operation::Receiving => &self.receive_aggregate,
            super::Operation::Rebroadcasting => &self.rebroadcast_aggregate,
        }
    }

    pub(crate) const fn chain(&self, operation: super::Operation) -> &FilterChain {
        match operation {
            super::Operation::Sending => &self.send,
            super::Operation::Receiving => &self.receive,
            super::Operation::Rebroadcasting => &self.rebroadcast,
        }
    }

    /// Record filters then aggregate filters for `context.operation()`.
    pub(crate) fn run(&self, batch: Vec<(String, Record)>, context: &TransportContext) -> RecordBatch {
        let mut filtered = self.chain(context.operation()).apply_all(batch, context);
        for aggregate in self.aggregate(context.operation()) {
            aggregate.filter(&mut filtered, context);
        }
        filtered
    }

    pub(crate) fn encode_buffer(&self, mut body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        for filter in &self.buffer {
            body = filter.encode(body)?;
        }
        Ok(body)
    }

    pub(crate) fn decode_buffer(&self, mut body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        for filter in self.buffer.iter().rev() {
            body = filter.decode(body)?;
        }
        Ok(body)
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSet")
            .field("send", &self.send)
            .field("receive", &self.receive)
            .field("rebroadcast", &self.rebroadcast)
            .field("send_aggregate", &self.send_aggregate.len())
            .field("receive_aggregate", &self.receive_aggregate.len())
            .field("rebroadcast_aggregate", &self.rebroadcast_aggregate.len())
            .field(
                "buffer",
                &self.buffer.iter().map(|b| b.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
