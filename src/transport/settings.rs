//! Transport and QoS configuration.
//!
//! Everything except the filter chains round-trips through JSON with
//! [`TransportSettings::save`] and [`TransportSettings::load`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::filters::FilterSet;
use super::trust::PeerTrust;
use crate::error::{ExecutionError, KbResult, ValidationError};
use crate::record::TypeMask;

/// Medium used to reach peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Nothing attached.
    #[default]
    None,
    /// Shared hub inside one process.
    InProcess,
    /// UDP unicast to each host after the first.
    Udp,
    /// UDP broadcast.
    Broadcast,
    /// UDP multicast group.
    Multicast,
    /// Stream transport; recognized but not provided.
    ReliableStream,
}

impl TransportKind {
    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::InProcess => "in_process",
            Self::Udp => "udp",
            Self::Broadcast => "broadcast",
            Self::Multicast => "multicast",
            Self::ReliableStream => "reliable_stream",
        }
    }
}

/// Delivery guarantee requested from the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Drop when a peer queue is full.
    #[default]
    BestEffort,
    /// Wait briefly for queue space.
    Reliable,
}

/// Drop emulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropKind {
    /// Evenly spaced drops.
    #[default]
    Deterministic,
    /// Bernoulli drops.
    Probabilistic,
}

/// Intentional packet loss applied at send time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DropPolicy {
    /// Fraction of packets to drop, in `[0, 1]`.
    pub rate: f64,
    /// Spacing strategy.
    pub kind: DropKind,
    /// Consecutive packets dropped per event.
    pub burst: u32,
    /// Seed for probabilistic drops.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl DropPolicy {
    /// No loss.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Drop `rate` of packets in evenly spaced bursts.
    #[must_use]
    pub fn deterministic(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            kind: DropKind::Deterministic,
            burst,
            seed: None,
        }
    }

    /// Drop bursts starting with probability `rate`.
    #[must_use]
    pub fn probabilistic(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            kind: DropKind::Probabilistic,
            burst,
            seed: None,
        }
    }

    /// Fix the random seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// True if any packet could be dropped.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.rate > 0.0
    }
}

/// Quality-of-service policy for one transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QosSettings {
    /// Hop budget stamped on outbound packets; 0 disables rebroadcast.
    pub rebroadcast_ttl: u8,
    /// Largest TTL this node will forward with; 0 opts out of forwarding.
    pub participant_ttl: u8,
    /// Cap on outbound bytes per second.
    pub send_bandwidth_limit: Option<u64>,
    /// Cap on outbound plus rebroadcast bytes per second.
    pub total_bandwidth_limit: Option<u64>,
    /// Maximum packet age accepted on receipt.
    pub deadline: Option<Duration>,
    /// Peer allow/deny lists.
    #[serde(default)]
    pub trust: PeerTrust,
    /// Emulated loss.
    #[serde(default)]
    pub drop: DropPolicy,
    /// Filter chains.
    #[serde(skip)]
    pub filters: FilterSet,
}

impl QosSettings {
    /// Stamp outbound packets with `ttl`.
    #[must_use]
    pub const fn with_rebroadcast_ttl(mut self, ttl: u8) -> Self {
        self.rebroadcast_ttl = ttl;
        self
    }

    /// Forward received packets with at most `ttl` hops left.
    #[must_use]
    pub const fn with_participant_ttl(mut self, ttl: u8) -> Self {
        self.participant_ttl = ttl;
        self
    }

    /// Limit outbound bytes per second.
    #[must_use]
    pub const fn with_send_bandwidth_limit(mut self, limit: u64) -> Self {
        self.send_bandwidth_limit = Some(limit);
        self
    }

    /// Limit outbound plus rebroadcast bytes per second.
    #[must_use]
    pub const fn with_total_bandwidth_limit(mut self, limit: u64) -> Self {
        self.total_bandwidth_limit = Some(limit);
        self
    }

    /// Drop packets older than `deadline` on receipt.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the drop emulation policy.
    #[must_use]
    pub const fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop = policy;
        self
    }

    /// Trust `peer`.
    #[must_use]
    pub fn with_trusted_peer(mut self, peer: impl Into<String>) -> Self {
        self.trust.add_trusted(peer);
        self
    }

    /// Ban `peer`.
    #[must_use]
    pub fn with_banned_peer(mut self, peer: impl Into<String>) -> Self {
        self.trust.add_banned(peer);
        self
    }

    /// Replace the filter set.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Number of send filters that apply to records of kind `mask`.
    #[must_use]
    pub fn send_filter_count(&self, mask: TypeMask) -> usize {
        self.filters.send.count_for(mask)
    }

    /// Number of receive filters that apply to records of kind `mask`.
    #[must_use]
    pub fn receive_filter_count(&self, mask: TypeMask) -> usize {
        self.filters.receive.count_for(mask)
    }

    /// Number of rebroadcast filters that apply to records of kind `mask`.
    #[must_use]
    pub fn rebroadcast_filter_count(&self, mask: TypeMask) -> usize {
        self.filters.rebroadcast.count_for(mask)
    }
}

/// Full transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Medium.
    pub kind: TransportKind,
    /// Namespace isolating unrelated groups on a shared medium.
    pub domain: String,
    /// Peer id; defaults to the medium address when empty.
    #[serde(default)]
    pub id: String,
    /// Expected number of processes.
    pub processes: u32,
    /// Addresses. For UDP kinds the first entry is the local bind address.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Receive queue capacity in packets.
    pub queue_length: usize,
    /// Delivery mode.
    #[serde(default)]
    pub reliability: Reliability,
    /// Never send.
    #[serde(default)]
    pub no_sending: bool,
    /// Never start a receive loop.
    #[serde(default)]
    pub no_receiving: bool,
    /// QoS policy.
    #[serde(default)]
    pub qos: QosSettings,
}

/// Default domain.
pub const DEFAULT_DOMAIN: &str = "swarmkb";

/// Default queue length.
pub const DEFAULT_QUEUE_LENGTH: usize = 1024;

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::None,
            domain: DEFAULT_DOMAIN.to_string(),
            id: String::new(),
            processes: 1,
            hosts: Vec::new(),
            queue_length: DEFAULT_QUEUE_LENGTH,
            reliability: Reliability::BestEffort,
            no_sending: false,
            no_receiving: false,
            qos: QosSettings::default(),
        }
    }
}

impl TransportSettings {
    /// Defaults for `kind`.
    #[must_use]
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Set the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the peer id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the host list.
    #[must_use]
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the queue length.
    #[must_use]
    pub const fn with_queue_length(mut self, queue_length: usize) -> Self {
        self.queue_length = queue_length;
        self
    }

    /// Set the reliability mode.
    #[must_use]
    pub const fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    /// Set the QoS policy.
    #[must_use]
    pub fn with_qos(mut self, qos: QosSettings) -> Self {
        self.qos = qos;
        self
    }

    /// Disable sending.
    #[must_use]
    pub const fn with_no_sending(mut self, disabled: bool) -> Self {
        self.no_sending = disabled;
        self
    }

    /// Disable receiving.
    #[must_use]
    pub const fn with_no_receiving(mut self, disabled: bool) -> Self {
        self.no_receiving = disabled;
        self
    }

    /// Check for settings that cannot work.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidSettings` describing the problem.
    pub fn validate(&self) -> KbResult<()> {
        let invalid = |reason: &str| -> KbResult<()> {
            Err(ValidationError::InvalidSettings {
                reason: reason.to_string(),
            }
            .into())
        };
        if self.queue_length == 0 {
            return invalid("queue_length must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.qos.drop.rate) {
            return invalid("drop rate must be within [0, 1]");
        }
        if matches!(
            self.kind,
            TransportKind::Udp | TransportKind::Broadcast | TransportKind::Multicast
        ) && self.hosts.is_empty()
        {
            return invalid("udp transports need at least one host");
        }
        Ok(())
    }

    /// Write the settings as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Storage` on I/O or encoding failure.
    pub fn save(&self, path: impl AsRef<Path>) -> KbResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| ExecutionError::Storage {
            message: format!("encoding transport settings: {e}"),
        })?;
        fs::write(path.as_ref(), json).map_err(|e| ExecutionError::Storage {
            message: format!("writing {}: {e}", path.as_ref().display()),
        })?;
        Ok(())
    }

    /// Read settings written by [`TransportSettings::save`].
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Storage` on I/O or decoding failure.
    pub fn load(path: impl AsRef<Path>) -> KbResult<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|e| ExecutionError::Storage {
            message: format!("reading {}: {e}", path.as_ref().display()),
        })?;
        let settings = serde_json::from_slice(&bytes).map_err(|e| ExecutionError::Storage {
            message: format!("decoding transport settings: {e}"),
        })?;
        Ok(settings)
    }
}
