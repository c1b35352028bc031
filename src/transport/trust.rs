//! Peer allow/deny lists.
//!
//! Peers are identified by transport id. With a non-empty trusted list only
//! listed peers are accepted; otherwise every peer not on the banned list is.
//! Trusting a peer lifts any ban on it, and banning a peer revokes its trust.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Trusted and banned peer sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTrust {
    #[serde(default)]
    trusted: BTreeSet<String>,
    #[serde(default)]
    banned: BTreeSet<String>,
}

impl PeerTrust {
    /// Accept-everyone policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer` to the trusted list.
    pub fn add_trusted(&mut self, peer: impl Into<String>) {
        let peer = peer.into();
        self.banned.remove(&peer);
        self.trusted.insert(peer);
    }

    /// Add `peer` to the banned list.
    pub fn add_banned(&mut self, peer: impl Into<String>) {
        let peer = peer.into();
        self.trusted.remove(&peer);
        self.banned.insert(peer);
    }

    /// Remove `peer` from the trusted list.
    pub fn remove_trusted(&mut self, peer: &str) -> bool {
        self.trusted.remove(peer)
    }

    /// Remove `peer` from the banned list.
    pub fn remove_banned(&mut self, peer: &str) -> bool {
        self.banned.remove(peer)
    }

    /// Decide whether packets from or to `peer` are allowed.
    #[must_use]
    pub fn is_trusted(&self, peer: &str) -> bool {
        if self.trusted.is_empty() {
            !self.banned.contains(peer)
        } else {
            self.trusted.contains(peer)
        }
    }

    /// Trusted peers.
    pub fn trusted(&self) -> impl Iterator<Item = &str> {
        self.trusted.iter().map(String::as_str)
    }

    /// Banned peers.
    pub fn banned(&self) -> impl Iterator<Item = &str> {
        self.banned.iter().map(String::as_str)
    }
}
