//! Store configuration and per-call write policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Identifier of this store, used in logs and saved contexts.
    pub id: String,
    /// Clock increment applied by each local write.
    pub clock_increment: u64,
    /// Quality stamped on local writes unless overridden per call.
    pub default_quality: u32,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            id: format!("kb-{}", Uuid::new_v4().simple()),
            clock_increment: 1,
            default_quality: 0,
        }
    }
}

impl KnowledgeBaseConfig {
    /// Set the store id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the default clock increment.
    #[must_use]
    pub const fn with_clock_increment(mut self, increment: u64) -> Self {
        self.clock_increment = increment;
        self
    }

    /// Set the default write quality.
    #[must_use]
    pub const fn with_default_quality(mut self, quality: u32) -> Self {
        self.default_quality = quality;
        self
    }
}

/// Write policy for a single call.
///
/// Used directly by containers, which never trigger a send on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Overrides [`KnowledgeBaseConfig::clock_increment`].
    pub clock_increment: Option<u64>,
    /// Overrides [`KnowledgeBaseConfig::default_quality`].
    pub quality: Option<u32>,
    /// Skip the conflict rule.
    pub always_overwrite: bool,
    /// Keep written keys out of the dirty set.
    pub treat_globals_as_locals: bool,
}

impl UpdateSettings {
    /// Defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom clock increment.
    #[must_use]
    pub const fn with_clock_increment(mut self, increment: u64) -> Self {
        self.clock_increment = Some(increment);
        self
    }

    /// Set the write quality.
    #[must_use]
    pub const fn with_quality(mut self, quality: u32) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Enable or disable the conflict-rule bypass.
    #[must_use]
    pub const fn always_overwrite(mut self, enabled: bool) -> Self {
        self.always_overwrite = enabled;
        self
    }

    /// Treat writes as local-only.
    #[must_use]
    pub const fn treat_globals_as_locals(mut self, enabled: bool) -> Self {
        self.treat_globals_as_locals = enabled;
        self
    }
}

/// Write policy for top-level store calls.
///
/// With `delay_sending_modifieds` unset, a write is flushed through the
/// attached transports as soon as it is applied; when set, the key stays in
/// the dirty set until the next explicit `send_modifieds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvalSettings {
    /// Base write policy.
    pub update: UpdateSettings,
    /// Leave dirty keys queued instead of flushing immediately.
    pub delay_sending_modifieds: bool,
}

impl EvalSettings {
    /// Settings that queue writes for a later explicit flush.
    #[must_use]
    pub fn delayed() -> Self {
        Self {
            delay_sending_modifieds: true,
            ..Self::default()
        }
    }

    /// Wrap an [`UpdateSettings`].
    #[must_use]
    pub const fn with_update(mut self, update: UpdateSettings) -> Self {
        self.update = update;
        self
    }
}

/// Polling policy for [`KnowledgeBase::wait`](crate::KnowledgeBase::wait).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSettings {
    /// Delay between evaluations.
    pub poll_frequency: Duration,
    /// Give up after this long; `None` waits indefinitely.
    pub max_wait: Option<Duration>,
    /// Flush the dirty set before each evaluation.
    pub send_modifieds: bool,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_frequency: Duration::from_millis(10),
            max_wait: Some(Duration::from_secs(10)),
            send_modifieds: true,
        }
    }
}

impl WaitSettings {
    /// Set the poll frequency.
    #[must_use]
    pub const fn with_poll_frequency(mut self, frequency: Duration) -> Self {
        self.poll_frequency = frequency;
        self
    }

    /// Set the maximum wait.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Enable or disable the pre-poll flush.
    #[must_use]
    pub const fn with_send_modifieds(mut self, enabled: bool) -> Self {
        self.send_modifieds = enabled;
        self
    }
}
