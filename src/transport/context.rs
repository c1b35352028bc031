//! What a filter knows about the packet it is looking at.

use serde::{Deserialize, Serialize};

/// Pipeline a filter is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Outbound flush of the local dirty set.
    Sending,
    /// Inbound packet from a peer.
    Receiving,
    /// Forwarding a received packet onward.
    Rebroadcasting,
}

/// Context passed to record and aggregate filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportContext {
    operation: Operation,
    send_bandwidth: u64,
    receive_bandwidth: u64,
    message_time: i64,
    current_time: i64,
    domain: String,
    originator: String,
}

impl TransportContext {
    /// Build a context. Times are milliseconds since the Unix epoch.
    #[must_use]
    pub fn new(
        operation: Operation,
        domain: impl Into<String>,
        originator: impl Into<String>,
        message_time: i64,
    ) -> Self {
        Self {
            operation,
            send_bandwidth: 0,
            receive_bandwidth: 0,
            message_time,
            current_time: chrono::Utc::now().timestamp_millis(),
            domain: domain.into(),
            originator: originator.into(),
        }
    }

    /// Attach bandwidth readings in bytes per second.
    #[must_use]
    pub const fn with_bandwidth(mut self, send: u64, receive: u64) -> Self {
        self.send_bandwidth = send;
        self.receive_bandwidth = receive;
        self
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Outbound bytes per second over the monitor window.
    #[must_use]
    pub const fn send_bandwidth(&self) -> u64 {
        self.send_bandwidth
    }

    /// Inbound bytes per second over the monitor window.
    #[must_use]
    pub const fn receive_bandwidth(&self) -> u64 {
        self.receive_bandwidth
    }

    /// Origination time of the packet (ms).
    #[must_use]
    pub const fn message_time(&self) -> i64 {
        self.message_time
    }

    /// Time the context was built (ms).
    #[must_use]
    pub const fn current_time(&self) -> i64 {
        self.current_time
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Id of the peer that produced the packet.
    #[must_use]
    pub fn originator(&self) -> &str {
        &self.originator
    }
}
