//! # swarmkb - Replicated shared knowledge for cooperating agents
//!
//! swarmkb gives every agent in a swarm a local key/value store whose writes
//! are stamped with a Lamport clock and a quality, queued in a dirty set, and
//! pushed to peers through pluggable transports. Peers merge updates with a
//! single conflict rule, so the swarm converges without a coordinator.
//!
//! ## Core Concepts
//!
//! - **KnowledgeBase**: The shared store, with triggers, waits and persistence
//! - **Record**: A typed value plus its clock, quality and flags
//! - **Transport**: A QoS pipeline (filters, trust, bandwidth shaping, TTL
//!   rebroadcast) over a medium such as UDP or an in-process hub
//! - **Containers**: Typed views over key regions (counters, barriers, ring
//!   buffers) for coordination
//!
//! ## Usage
//!
//! ```rust,ignore
//! use swarmkb::{InProcessHub, KnowledgeBase, TransportKind, TransportSettings};
//! use swarmkb::containers::Counter;
//!
//! let hub = InProcessHub::new();
//! let agent = KnowledgeBase::new();
//! agent.attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id("agent-0"))?;
//!
//! let tasks = Counter::new(&agent, "tasks.done", 0, 4)?;
//! tasks.inc()?;
//! agent.send_modifieds()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod record;

// Store and replication
pub mod knowledge;
pub mod transport;

// Coordination and support
pub mod containers;
pub mod logging;
mod persist;

// Re-export primary types at crate root for convenience
pub use error::{ExecutionError, KbError, KbResult, TransportError, ValidationError};
pub use knowledge::{
    EvalSettings, KeyPattern, KnowledgeBase, KnowledgeBaseConfig, TriggerFn, TriggerToken,
    UpdateSettings, Variables, WaitOutcome, WaitSettings, WeakKnowledgeBase,
};
pub use record::{AnyRegistry, AnyValue, Record, Toggles, TypeMask, Value, WriteOutcome};

pub use containers::{
    Barrier, CircularBuffer, CircularBufferConsumer, Collection, Container, Counter, Double,
    Integer, Map, Text, Vector,
};
pub use transport::{
    AggregateFilter, BandwidthMonitor, BufferFilter, DropKind, DropPolicy, FilterChain, FilterSet,
    InProcessEndpoint, InProcessHub, Medium, Operation, PeerTrust, QosSettings, RecordBatch,
    RecordFilter, Reliability, TransportContext, TransportHandle, TransportKind,
    TransportSettings, TransportStats, UdpMedium,
};
