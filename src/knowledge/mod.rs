//! The replicated knowledge store.
//!
//! A [`KnowledgeBase`] is a cheap, clonable handle to one store. All public
//! calls serialize on a single exclusive section. Triggers run inside that
//! section with an explicit "inside trigger" flag set; any public call made
//! from a trigger re-enters the section, sees the flag and fails with
//! [`ExecutionError::Locked`] instead of deadlocking. Triggers use the
//! [`Variables`] view they are given.
//!
//! Attached transports are kept apart from the store state. A flush takes a
//! snapshot of the transport list, drains the dirty set under the store lock,
//! and sends with no store lock held.

mod context;
mod pattern;
mod settings;
mod triggers;
mod variables;

use std::cell::{Cell, RefCell, RefMut};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use pattern::KeyPattern;
pub(crate) use pattern::validate_key;
pub use settings::{EvalSettings, KnowledgeBaseConfig, UpdateSettings, WaitSettings};
pub use triggers::{TriggerFn, TriggerToken};
pub use variables::Variables;

use crate::error::{ExecutionError, KbError, KbResult, TransportError, ValidationError};
use crate::persist::{self, ContextImage};
use crate::record::{AnyRegistry, Record, Value, WriteOutcome};
use crate::transport::{
    InProcessHub, Medium, ReceiveLoop, Transport, TransportCore, TransportHandle, TransportKind,
    TransportSettings, UdpMedium, RECEIVE_POLL,
};
use context::Context;
use triggers::Trigger;

struct StoreState {
    ctx: RefCell<Context>,
    in_trigger: Cell<bool>,
}

/// Sets the trigger flag for its lifetime, including on unwind.
struct TriggerScope<'a>(&'a Cell<bool>);

impl<'a> TriggerScope<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for TriggerScope<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct Shared {
    config: KnowledgeBaseConfig,
    state: ReentrantMutex<StoreState>,
    any_types: AnyRegistry,
    transports: Mutex<Vec<Transport>>,
}

/// Result of [`KnowledgeBase::wait`].
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome {
    /// Last value the predicate returned.
    pub value: Value,
    /// True if `max_wait` elapsed before the value became true.
    pub timed_out: bool,
    /// Number of evaluations.
    pub polls: u32,
}

/// Handle to a replicated key-value store.
#[derive(Clone)]
pub struct KnowledgeBase {
    inner: Arc<Shared>,
}

/// Non-owning handle; does not keep the store alive.
#[derive(Clone, Default)]
pub struct WeakKnowledgeBase {
    inner: Weak<Shared>,
}

impl WeakKnowledgeBase {
    /// A handle that never upgrades.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The store, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<KnowledgeBase> {
        self.inner.upgrade().map(|inner| KnowledgeBase { inner })
    }
}

impl std::fmt::Debug for WeakKnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakKnowledgeBase")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("id", &self.inner.config.id)
            .field("transports", &self.inner.transports.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

fn ctx_mut(state: &StoreState) -> KbResult<RefMut<'_, Context>> {
    state
        .ctx
        .try_borrow_mut()
        .map_err(|_| ExecutionError::Locked.into())
}

impl KnowledgeBase {
    /// Empty store with a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(KnowledgeBaseConfig::default())
    }

    /// Empty store with `config`.
    #[must_use]
    pub fn with_config(config: KnowledgeBaseConfig) -> Self {
        Self::from_context(Context::new(config.clone()), config)
    }

    fn from_context(ctx: Context, config: KnowledgeBaseConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                state: ReentrantMutex::new(StoreState {
                    ctx: RefCell::new(ctx),
                    in_trigger: Cell::new(false),
                }),
                any_types: AnyRegistry::new(),
                transports: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Store id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &KnowledgeBaseConfig {
        &self.inner.config
    }

    /// Weak handle for background threads and containers.
    #[must_use]
    pub fn downgrade(&self) -> WeakKnowledgeBase {
        WeakKnowledgeBase {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True if both handles refer to the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self, operation: &'static str) -> KbResult<ReentrantMutexGuard<'_, StoreState>> {
        let guard = self.inner.state.lock();
        if guard.in_trigger.get() {
            warn!(store = %self.id(), operation, "rejected re-entrant store access from a trigger");
            return Err(ExecutionError::Locked.into());
        }
        Ok(guard)
    }

    fn read<R>(&self, operation: &'static str, f: impl FnOnce(&Context) -> R) -> KbResult<R> {
        let state = self.lock(operation)?;
        let ctx = state
            .ctx
            .try_borrow()
            .map_err(|_| KbError::from(ExecutionError::Locked))?;
        Ok(f(&ctx))
    }

    /// Run every trigger whose pattern matches one of `keys`.
    fn fire_triggers(&self, state: &StoreState, keys: &[String]) -> KbResult<()> {
        let matching = ctx_mut(state)?.triggers.matching(keys);
        for trigger in matching {
            if let Err(e) = self.run_trigger(state, &trigger) {
                warn!(store = %self.id(), trigger = %trigger.name, error = %e, "trigger failed");
            }
        }
        Ok(())
    }

    fn run_trigger(&self, state: &StoreState, trigger: &Trigger) -> KbResult<()> {
        let _scope = TriggerScope::enter(&state.in_trigger);
        let mut ctx = ctx_mut(state)?;
        let mut vars = Variables::new(&mut ctx);
        debug!(store = %self.id(), trigger = %trigger.name, "running trigger");
        (trigger.callback)(&mut vars)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current record at `key`; an uninitialized record if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn get(&self, key: &str) -> KbResult<Record> {
        self.read("get", |ctx| ctx.get(key))
    }

    /// True if `key` holds an initialized value.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn exists(&self, key: &str) -> KbResult<bool> {
        self.read("exists", |ctx| ctx.exists(key))
    }

    /// All keys in order.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn keys(&self) -> KbResult<Vec<String>> {
        self.read("keys", Context::keys)
    }

    /// Number of keys, including uninitialized placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn len(&self) -> KbResult<usize> {
        self.read("len", Context::len)
    }

    /// True if the store holds no keys.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn is_empty(&self) -> KbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Store Lamport clock.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn clock(&self) -> KbResult<u64> {
        self.read("clock", Context::clock)
    }

    /// Snapshot of the keys matching `pattern` (`*`, `prefix*`, `*suffix`,
    /// `a*b`, or an exact key).
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed patterns.
    pub fn to_map(&self, pattern: &str) -> KbResult<BTreeMap<String, Record>> {
        let pattern = KeyPattern::parse(pattern)?;
        self.read("to_map", |ctx| ctx.to_map(&pattern))
    }

    /// Snapshot of the keys starting with `prefix` and ending with `suffix`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn to_map_range(&self, prefix: &str, suffix: &str) -> KbResult<BTreeMap<String, Record>> {
        self.read("to_map_range", |ctx| ctx.range(prefix, suffix))
    }

    /// True if `key` is queued for the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn is_dirty(&self, key: &str) -> KbResult<bool> {
        self.read("is_dirty", |ctx| ctx.is_dirty(key))
    }

    /// Dirty keys in first-change order.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn modifieds(&self) -> KbResult<Vec<String>> {
        self.read("modifieds", Context::modified_keys)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write `value` with default settings.
    ///
    /// The returned outcome reports whether the conflict rule accepted the
    /// write; a discarded write is not an error.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or wildcard keys,
    /// [`ExecutionError::Locked`] from inside a trigger, or the first
    /// transport error of the automatic flush.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> KbResult<WriteOutcome> {
        self.set_with(key, value, &EvalSettings::default())
    }

    /// Write `value` with explicit settings.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeBase::set`].
    pub fn set_with(
        &self,
        key: &str,
        value: impl Into<Value>,
        settings: &EvalSettings,
    ) -> KbResult<WriteOutcome> {
        let value = value.into();
        let outcome = {
            let state = self.lock("set")?;
            let outcome = ctx_mut(&state)?.set(key, value, &settings.update)?;
            if outcome.is_accepted() {
                self.fire_triggers(&state, &[key.to_string()])?;
            }
            outcome
        };
        if outcome.is_accepted() {
            self.flush_unless_delayed(settings)?;
        }
        Ok(outcome)
    }

    /// Add `delta` to the integer view of `key` and return the stored value.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeBase::set`].
    pub fn inc(&self, key: &str, delta: i64) -> KbResult<i64> {
        self.inc_with(key, delta, &EvalSettings::default())
    }

    /// [`KnowledgeBase::inc`] with explicit settings.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeBase::set`].
    pub fn inc_with(&self, key: &str, delta: i64, settings: &EvalSettings) -> KbResult<i64> {
        let value = {
            let state = self.lock("inc")?;
            let value = ctx_mut(&state)?.inc(key, delta, &settings.update)?;
            self.fire_triggers(&state, &[key.to_string()])?;
            value
        };
        self.flush_unless_delayed(settings)?;
        Ok(value)
    }

    /// Apply a record that carries its own clock and quality, as a peer's
    /// update would be. The key is not marked dirty.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or wildcard keys, or
    /// [`ExecutionError::Locked`] from inside a trigger.
    pub fn update(&self, key: &str, record: Record) -> KbResult<WriteOutcome> {
        let state = self.lock("update")?;
        let outcome = ctx_mut(&state)?.update(key, record, false)?;
        if outcome.is_accepted() {
            self.fire_triggers(&state, &[key.to_string()])?;
        }
        Ok(outcome)
    }

    /// Remove `key`. Deletion is local and is not replicated.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn delete(&self, key: &str) -> KbResult<bool> {
        let state = self.lock("delete")?;
        let removed = ctx_mut(&state)?.delete(key);
        Ok(removed)
    }

    /// Remove every key and empty the dirty set. The clock is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn clear(&self) -> KbResult<()> {
        let state = self.lock("clear")?;
        ctx_mut(&state)?.clear();
        Ok(())
    }

    /// Mark `key` local-only (never replicated) or global again.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or wildcard keys.
    pub fn set_local_only(&self, key: &str, local: bool) -> KbResult<()> {
        let state = self.lock("set_local_only")?;
        let result = ctx_mut(&state)?.set_local_only(key, local);
        result
    }

    /// Queue `key` for re-send without changing it. Returns false for
    /// absent or local keys.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn mark_modified(&self, key: &str) -> KbResult<bool> {
        let state = self.lock("mark_modified")?;
        let marked = ctx_mut(&state)?.mark_modified(key);
        Ok(marked)
    }

    /// Discard the dirty set without sending.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn clear_modifieds(&self) -> KbResult<()> {
        let state = self.lock("clear_modifieds")?;
        ctx_mut(&state)?.clear_modifieds();
        Ok(())
    }

    /// Run `f` against the store inside the exclusive section, without firing
    /// triggers or flushing. Containers use this to keep multi-key updates
    /// together.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] from inside a trigger, or whatever
    /// `f` returns.
    pub fn access<R>(&self, f: impl FnOnce(&mut Variables<'_>) -> KbResult<R>) -> KbResult<R> {
        let state = self.lock("access")?;
        let mut ctx = ctx_mut(&state)?;
        let mut vars = Variables::new(&mut ctx);
        f(&mut vars)
    }

    /// Independent copy of the records, dirty set and clock. Triggers and
    /// transports are not copied.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn deep_copy(&self) -> KbResult<Self> {
        let config = self.inner.config.clone();
        let ctx = self.read("deep_copy", |ctx| ctx.deep_copy(config.clone()))?;
        let copy = Self::from_context(ctx, config);
        for tag in self.inner.any_types.tags() {
            copy.inner.any_types.register(tag);
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    /// Register a trigger. With a pattern it fires after every accepted local
    /// write or peer update to a matching key; without one it only runs
    /// through [`KnowledgeBase::invoke`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed patterns.
    pub fn add_trigger<F>(
        &self,
        name: impl Into<String>,
        pattern: Option<&str>,
        callback: F,
    ) -> KbResult<TriggerToken>
    where
        F: Fn(&mut Variables<'_>) -> KbResult<()> + Send + Sync + 'static,
    {
        let pattern = pattern.map(KeyPattern::parse).transpose()?;
        let trigger = Trigger::new(name.into(), pattern, Arc::new(callback));
        let state = self.lock("add_trigger")?;
        let token = ctx_mut(&state)?.triggers.insert(trigger);
        Ok(token)
    }

    /// Unregister a trigger. Returns false if the token is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn remove_trigger(&self, token: TriggerToken) -> KbResult<bool> {
        let state = self.lock("remove_trigger")?;
        let removed = ctx_mut(&state)?.triggers.remove(token);
        Ok(removed)
    }

    /// Run every trigger registered under `name` and return how many ran.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::TriggerNotFound`] if none is registered, or
    /// the first error a trigger returns.
    pub fn invoke(&self, name: &str) -> KbResult<usize> {
        let state = self.lock("invoke")?;
        let triggers = ctx_mut(&state)?.triggers.by_name(name);
        if triggers.is_empty() {
            return Err(ExecutionError::TriggerNotFound {
                name: name.to_string(),
            }
            .into());
        }
        for trigger in &triggers {
            self.run_trigger(&state, trigger)?;
        }
        Ok(triggers.len())
    }

    /// Evaluate `predicate` until it yields a true value or `max_wait`
    /// elapses. Timing out is a normal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] from inside a trigger, or a
    /// transport error from the pre-poll flush.
    pub fn wait<F>(&self, predicate: F, settings: &WaitSettings) -> KbResult<WaitOutcome>
    where
        F: Fn(&Variables<'_>) -> Value,
    {
        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            if settings.send_modifieds {
                self.send_modifieds()?;
            }
            let value = self.access(|vars| Ok(predicate(vars)))?;
            polls = polls.saturating_add(1);
            if value.is_true() {
                return Ok(WaitOutcome {
                    value,
                    timed_out: false,
                    polls,
                });
            }
            if settings.max_wait.is_some_and(|max| start.elapsed() >= max) {
                debug!(store = %self.id(), polls, "wait timed out");
                return Ok(WaitOutcome {
                    value,
                    timed_out: true,
                    polls,
                });
            }
            thread::sleep(settings.poll_frequency);
        }
    }

    // ------------------------------------------------------------------
    // "Any" types
    // ------------------------------------------------------------------

    /// Allow records tagged `tag` to be sent. Returns false if already registered.
    pub fn register_any_type(&self, tag: impl Into<String>) -> bool {
        self.inner.any_types.register(tag)
    }

    /// The store's "Any" type registry.
    #[must_use]
    pub fn any_types(&self) -> &AnyRegistry {
        &self.inner.any_types
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write every record to `path`, replacing the file. Returns the record count.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Storage`] on I/O failure.
    pub fn save_context(&self, path: impl AsRef<Path>) -> KbResult<usize> {
        let image = self.read("save_context", |ctx| {
            ContextImage::new(self.id(), ctx.clock(), ctx.snapshot())
        })?;
        persist::save_image(path.as_ref(), &image)?;
        info!(store = %self.id(), records = image.records.len(), path = %path.as_ref().display(), "saved context");
        Ok(image.records.len())
    }

    /// Load a context file, overwriting matching keys regardless of clock.
    /// Loaded keys are not marked dirty. Returns the record count.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Storage`] if the file is missing or corrupt.
    pub fn load_context(&self, path: impl AsRef<Path>) -> KbResult<usize> {
        let image = persist::load_image(path.as_ref())?;
        let count = self.apply_image(&image)?;
        info!(store = %self.id(), records = count, source = %image.id, "loaded context");
        Ok(count)
    }

    /// Append the records changed since the last checkpoint to `path`.
    /// With `reset` the change tracking starts over. Returns the record count.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Storage`] on I/O failure.
    pub fn save_checkpoint(&self, path: impl AsRef<Path>, reset: bool) -> KbResult<usize> {
        let image = {
            let state = self.lock("save_checkpoint")?;
            let mut ctx = ctx_mut(&state)?;
            let records = ctx.checkpoint_records(reset);
            ContextImage::new(self.id(), ctx.clock(), records)
        };
        persist::append_checkpoint(path.as_ref(), &image)?;
        debug!(store = %self.id(), records = image.records.len(), "saved checkpoint");
        Ok(image.records.len())
    }

    /// Replay every checkpoint in `path` in order. Returns the total number
    /// of records applied.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Storage`] if the file is missing or corrupt.
    pub fn load_checkpoints(&self, path: impl AsRef<Path>) -> KbResult<usize> {
        let images = persist::read_checkpoints(path.as_ref())?;
        let mut total = 0;
        for image in &images {
            total += self.apply_image(image)?;
        }
        info!(store = %self.id(), frames = images.len(), records = total, "replayed checkpoints");
        Ok(total)
    }

    fn apply_image(&self, image: &ContextImage) -> KbResult<usize> {
        let state = self.lock("load")?;
        let mut ctx = ctx_mut(&state)?;
        ctx.observe_clock(image.clock);
        for (key, record) in &image.records {
            ctx.update(key, record.clone(), true)?;
        }
        Ok(image.records.len())
    }

    // ------------------------------------------------------------------
    // Transports
    // ------------------------------------------------------------------

    /// Attach a network transport described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad settings or a kind that cannot be
    /// attached this way, [`TransportError::Unsupported`] for reliable
    /// streams, or a transport error if the socket cannot be bound.
    pub fn attach_transport(&self, settings: TransportSettings) -> KbResult<TransportHandle> {
        settings.validate()?;
        let medium: Box<dyn Medium> = match settings.kind {
            TransportKind::Udp | TransportKind::Broadcast | TransportKind::Multicast => {
                Box::new(UdpMedium::bind(&settings, RECEIVE_POLL)?)
            }
            TransportKind::ReliableStream => {
                return Err(TransportError::Unsupported {
                    kind: settings.kind.as_str().to_string(),
                }
                .into())
            }
            TransportKind::None | TransportKind::InProcess => {
                return Err(ValidationError::InvalidSettings {
                    reason: format!(
                        "transport kind '{}' cannot be attached from settings alone",
                        settings.kind.as_str()
                    ),
                }
                .into())
            }
        };
        self.attach_medium(settings, medium)
    }

    /// Attach a transport on an in-process hub. The endpoint address is the
    /// settings id, else the first host, else a generated name.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad settings or a transport error if
    /// the address is already taken on the hub.
    pub fn attach_in_process(
        &self,
        hub: &InProcessHub,
        mut settings: TransportSettings,
    ) -> KbResult<TransportHandle> {
        settings.kind = TransportKind::InProcess;
        settings.validate()?;
        let address = if !settings.id.is_empty() {
            settings.id.clone()
        } else if let Some(host) = settings.hosts.first() {
            host.clone()
        } else {
            format!("{}.{}", self.id(), Uuid::new_v4().simple())
        };
        let endpoint = hub.endpoint(address, settings.queue_length, settings.reliability)?;
        self.attach_medium(settings, Box::new(endpoint))
    }

    /// Attach a transport over a caller-supplied medium.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad settings or a transport error if
    /// the receive thread cannot be started.
    pub fn attach_medium(
        &self,
        mut settings: TransportSettings,
        medium: Box<dyn Medium>,
    ) -> KbResult<TransportHandle> {
        settings.validate()?;
        if settings.id.is_empty() {
            settings.id = medium.local_address();
        }
        let no_receiving = settings.no_receiving;
        let core = Arc::new(TransportCore::new(settings, medium));
        let receiver = if no_receiving {
            None
        } else {
            Some(ReceiveLoop::start(Arc::clone(&core), self.downgrade())?)
        };
        let transport = Transport::new(core, receiver);
        let handle = transport.handle();
        info!(
            store = %self.id(),
            transport = %handle.id(),
            kind = handle.kind().as_str(),
            domain = %handle.domain(),
            "transport attached"
        );
        self.inner.transports.lock().push(transport);
        Ok(handle)
    }

    /// Handles to every attached transport.
    #[must_use]
    pub fn transports(&self) -> Vec<TransportHandle> {
        self.inner.transports.lock().iter().map(Transport::handle).collect()
    }

    /// Close and remove the transport with `id`. Returns false if none matched.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn detach_transport(&self, id: &str) -> KbResult<bool> {
        drop(self.lock("detach_transport")?);
        let removed: Vec<Transport> = {
            let mut transports = self.inner.transports.lock();
            let (gone, kept) = std::mem::take(&mut *transports)
                .into_iter()
                .partition(|t| t.handle().id() == id);
            *transports = kept;
            gone
        };
        let found = !removed.is_empty();
        for mut transport in removed {
            transport.close();
        }
        Ok(found)
    }

    /// Close every attached transport, stopping their receive threads.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] when called from inside a trigger.
    pub fn close_transports(&self) -> KbResult<()> {
        drop(self.lock("close_transports")?);
        let transports = std::mem::take(&mut *self.inner.transports.lock());
        let count = transports.len();
        for mut transport in transports {
            transport.close();
        }
        if count > 0 {
            info!(store = %self.id(), count, "closed transports");
        }
        Ok(())
    }

    /// Send the dirty set through every attached transport and clear it.
    ///
    /// With no transports attached this is a no-op and the dirty set is
    /// kept. The dirty set is cleared even if a transport fails; every
    /// transport is tried and the first error is returned. Returns the
    /// largest number of records any transport put on the wire.
    ///
    /// Records holding an [`AnyValue`](crate::record::AnyValue) whose tag is
    /// not registered are held back and stay dirty, so the rest of the batch
    /// still goes out and the held keys follow once the tag is registered.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Locked`] from inside a trigger,
    /// `TransportError::UnregisteredType` if any record was held back, or the
    /// first transport error.
    pub fn send_modifieds(&self) -> KbResult<usize> {
        let cores: Vec<Arc<TransportCore>> = self
            .inner
            .transports
            .lock()
            .iter()
            .map(Transport::shared_core)
            .collect();
        let (batch, clock, held) = {
            let state = self.lock("send_modifieds")?;
            if cores.is_empty() {
                return Ok(0);
            }
            let mut ctx = ctx_mut(&state)?;
            let mut batch = ctx.take_modifieds();
            let mut held = Vec::new();
            batch.retain(|(key, record)| match record.value() {
                Value::Any(any) if !self.inner.any_types.contains(any.tag()) => {
                    held.push((key.clone(), any.tag().to_string()));
                    false
                }
                _ => true,
            });
            for (key, _) in &held {
                ctx.mark_modified(key);
            }
            (batch, ctx.clock(), held)
        };

        let mut first_error: Option<KbError> = None;
        for (key, tag) in &held {
            warn!(store = %self.id(), key = %key, tag = %tag, "unregistered type held back");
            first_error.get_or_insert_with(|| {
                TransportError::UnregisteredType { tag: tag.clone() }.into()
            });
        }
        if batch.is_empty() {
            return first_error.map_or(Ok(0), Err);
        }

        let mut sent = 0;
        for core in &cores {
            match core.send(batch.clone(), &self.inner.any_types, clock) {
                Ok(n) => sent = sent.max(n),
                Err(e) => {
                    warn!(store = %self.id(), transport = %core.id(), error = %e, "send failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(sent), Err)
    }

    fn flush_unless_delayed(&self, settings: &EvalSettings) -> KbResult<()> {
        if !settings.delay_sending_modifieds {
            self.send_modifieds()?;
        }
        Ok(())
    }

    /// Apply a batch received from a peer. Returns the number of accepted records.
    pub(crate) fn apply_remote(&self, records: &[(String, Record)], clock: u64) -> KbResult<usize> {
        let state = self.lock("apply_remote")?;
        let mut accepted = Vec::new();
        {
            let mut ctx = ctx_mut(&state)?;
            ctx.observe_clock(clock);
            for (key, record) in records {
                match ctx.update(key, record.clone(), false) {
                    Ok(outcome) if outcome.is_accepted() => accepted.push(key.clone()),
                    Ok(_) => {}
                    Err(e) => debug!(store = %self.id(), key = %key, error = %e, "ignoring invalid remote key"),
                }
            }
        }
        self.fire_triggers(&state, &accepted)?;
        Ok(accepted.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::record::AnyValue;
    use crate::transport::QosSettings;

    #[test]
    fn test_get_absent_is_uninitialized() {
        let kb = KnowledgeBase::new();
        let record = kb.get("missing").unwrap();
        assert!(!record.exists());
        assert!(!kb.exists("missing").unwrap());
    }

    #[test]
    fn test_set_marks_dirty_without_transports() {
        let kb = KnowledgeBase::new();
        assert!(kb.set("a", 1).unwrap().is_accepted());
        assert!(kb.is_dirty("a").unwrap());
        // Nothing attached: the dirty set survives a flush.
        assert_eq!(kb.send_modifieds().unwrap(), 0);
        assert_eq!(kb.modifieds().unwrap(), vec!["a".to_string()]);
        kb.clear_modifieds().unwrap();
        assert!(kb.modifieds().unwrap().is_empty());
    }

    #[test]
    fn test_local_keys_never_dirty() {
        let kb = KnowledgeBase::new();
        kb.set(".scratch", 5).unwrap();
        kb.set_local_only("private", true).unwrap();
        kb.set("private", 1).unwrap();
        assert!(kb.modifieds().unwrap().is_empty());
        assert!(!kb.mark_modified("private").unwrap());
    }

    #[test]
    fn test_update_conflict_rule() {
        let kb = KnowledgeBase::new();
        kb.update("k", Record::new(1).with_clock(5)).unwrap();
        assert_eq!(
            kb.update("k", Record::new(2).with_clock(4)).unwrap(),
            WriteOutcome::Discarded
        );
        assert_eq!(kb.get("k").unwrap().to_integer(), 1);
        assert!(kb
            .update("k", Record::new(3).with_clock(1).with_quality(2))
            .unwrap()
            .is_accepted());
        assert_eq!(kb.get("k").unwrap().to_integer(), 3);
        assert!(!kb.is_dirty("k").unwrap());
        assert_eq!(kb.clock().unwrap(), 5);
    }

    #[test]
    fn test_low_quality_local_write_discarded() {
        let kb = KnowledgeBase::new();
        kb.update("k", Record::new(1).with_quality(5)).unwrap();
        assert_eq!(kb.set("k", 2).unwrap(), WriteOutcome::Discarded);
        let overwrite = EvalSettings::default().with_update(UpdateSettings::new().always_overwrite(true));
        assert!(kb.set_with("k", 2, &overwrite).unwrap().is_accepted());
    }

    #[test]
    fn test_to_map_is_a_snapshot() {
        let kb = KnowledgeBase::new();
        kb.set("agent.0.x", 1).unwrap();
        kb.set("agent.1.x", 2).unwrap();
        kb.set("other", 3).unwrap();
        let map = kb.to_map("agent.*").unwrap();
        kb.set("agent.0.x", 10).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["agent.0.x"].to_integer(), 1);
        assert_eq!(kb.to_map_range("agent.", ".x").unwrap().len(), 2);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let kb = KnowledgeBase::new();
        kb.set("a", 1).unwrap();
        let copy = kb.deep_copy().unwrap();
        copy.set("a", 2).unwrap();
        assert_eq!(kb.get("a").unwrap().to_integer(), 1);
        assert_eq!(copy.get("a").unwrap().to_integer(), 2);
        assert!(!kb.ptr_eq(&copy));
    }

    #[test]
    fn test_trigger_fires_on_matching_write() {
        let kb = KnowledgeBase::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        kb.add_trigger("mirror", Some("sensor.*"), move |vars| {
            seen.fetch_add(1, Ordering::SeqCst);
            let v = vars.get("sensor.temp").to_integer();
            vars.set(".mirror", v)?;
            Ok(())
        })
        .unwrap();

        kb.set("sensor.temp", 21).unwrap();
        kb.set("unrelated", 1).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(kb.get(".mirror").unwrap().to_integer(), 21);
    }

    #[test]
    fn test_reentrant_call_from_trigger_is_locked() {
        let kb = KnowledgeBase::new();
        let inner = kb.clone();
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        kb.add_trigger("bad", None, move |_vars| {
            *slot.lock() = Some(inner.set("x", 1).map(|_| ()));
            Ok(())
        })
        .unwrap();

        assert_eq!(kb.invoke("bad").unwrap(), 1);
        let err = result.lock().take().unwrap().unwrap_err();
        assert!(err.is_locked());
        // The store is usable again afterwards.
        assert!(kb.set("x", 1).unwrap().is_accepted());
    }

    #[test]
    fn test_invoke_unknown_trigger() {
        let kb = KnowledgeBase::new();
        let err = kb.invoke("nope").unwrap_err();
        assert!(matches!(
            err,
            KbError::Execution(ExecutionError::TriggerNotFound { .. })
        ));
    }

    #[test]
    fn test_remove_trigger() {
        let kb = KnowledgeBase::new();
        let token = kb.add_trigger("t", Some("*"), |_| Ok(())).unwrap();
        assert!(kb.remove_trigger(token).unwrap());
        assert!(!kb.remove_trigger(token).unwrap());
    }

    #[test]
    fn test_wait_times_out_without_error() {
        let kb = KnowledgeBase::new();
        let settings = WaitSettings::default()
            .with_poll_frequency(Duration::from_millis(1))
            .with_max_wait(Some(Duration::from_millis(20)));
        let outcome = kb.wait(|vars| Value::from(vars.exists("never")), &settings).unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.polls >= 1);
        assert!(!outcome.value.is_true());
    }

    #[test]
    fn test_wait_sees_other_thread() {
        let kb = KnowledgeBase::new();
        let writer = kb.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set("ready", 1).unwrap();
        });
        let outcome = kb
            .wait(|vars| vars.get("ready").into_value(), &WaitSettings::default())
            .unwrap();
        handle.join().unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.value, Value::Integer(1));
    }

    #[test]
    fn test_attach_requires_supported_kind() {
        let kb = KnowledgeBase::new();
        let err = kb
            .attach_transport(TransportSettings::new(TransportKind::ReliableStream).with_hosts(["127.0.0.1:1"]))
            .unwrap_err();
        assert!(err.is_transport());
        let err = kb
            .attach_transport(TransportSettings::new(TransportKind::InProcess))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_in_process_pair_replicates() {
        let hub = InProcessHub::new();
        let a = KnowledgeBase::new();
        let b = KnowledgeBase::new();
        a.attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id("a"))
            .unwrap();
        b.attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id("b"))
            .unwrap();

        a.set("greeting", "hello").unwrap();
        assert!(!a.is_dirty("greeting").unwrap());
        let outcome = b
            .wait(|vars| Value::from(vars.exists("greeting")), &WaitSettings::default())
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(b.get("greeting").unwrap().to_string_value(), "hello");
        assert!(!b.is_dirty("greeting").unwrap());
        assert!(b.clock().unwrap() >= 1);

        a.close_transports().unwrap();
        assert!(a.transports().is_empty());
    }

    #[test]
    fn test_unregistered_any_does_not_sink_the_batch() {
        let hub = InProcessHub::new();
        let a = KnowledgeBase::new();
        let b = KnowledgeBase::new();
        a.attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id("a"))
            .unwrap();
        b.attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id("b"))
            .unwrap();

        let delayed = EvalSettings::delayed();
        a.set_with("good", 42, &delayed).unwrap();
        a.set_with("bad", AnyValue::from_raw("pose", vec![1, 2, 3]), &delayed)
            .unwrap();

        let err = a.send_modifieds().unwrap_err();
        assert!(matches!(
            err,
            KbError::Transport(TransportError::UnregisteredType { ref tag }) if tag == "pose"
        ));
        assert!(!a.is_dirty("good").unwrap());
        assert!(a.is_dirty("bad").unwrap());
        let outcome = b
            .wait(|vars| Value::from(vars.exists("good")), &WaitSettings::default())
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(b.get("good").unwrap().to_integer(), 42);

        assert!(a.register_any_type("pose"));
        assert_eq!(a.send_modifieds().unwrap(), 1);
        assert!(!a.is_dirty("bad").unwrap());
        let outcome = b
            .wait(|vars| Value::from(vars.exists("bad")), &WaitSettings::default())
            .unwrap();
        assert!(!outcome.timed_out);
    }

    #[test]
    fn test_detach_transport() {
        let hub = InProcessHub::new();
        let kb = KnowledgeBase::new();
        let handle = kb
            .attach_in_process(
                &hub,
                TransportSettings::new(TransportKind::InProcess)
                    .with_id("solo")
                    .with_qos(QosSettings::default()),
            )
            .unwrap();
        assert_eq!(kb.transports().len(), 1);
        assert!(kb.detach_transport("solo").unwrap());
        assert!(handle.is_closed());
        assert!(!kb.detach_transport("solo").unwrap());
        assert!(hub.addresses().is_empty());
    }
}
