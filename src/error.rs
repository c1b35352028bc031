//! Error types for swarmkb.
//!
//! All errors are strongly typed using thiserror. Expected steady-state
//! conditions of a loosely-coupled swarm (absent keys, stale updates, consumer
//! overrun) are not errors and never appear here.

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Key cannot be empty")]
    EmptyKey,

    #[error("Key '{key}' is a pattern and cannot be used as a write target")]
    PatternKey {
        key: String,
    },

    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Ring id {id} is outside ring size {size}")]
    RingIdOutOfRange {
        id: usize,
        size: usize,
    },

    #[error("Capacity must be greater than zero")]
    ZeroCapacity,

    #[error("Index {index} is out of bounds for length {len}")]
    IndexOutOfRange {
        index: usize,
        len: usize,
    },

    #[error("Invalid settings: {reason}")]
    InvalidSettings {
        reason: String,
    },
}

/// Execution errors that occur while operating on a store or container.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Store is locked by a running trigger; re-entrant call rejected")]
    Locked,

    #[error("Container '{name}' refers to a store that has been released")]
    Released {
        name: String,
    },

    #[error("Container has not been bound to a store")]
    Unbound,

    #[error("Trigger not found: {name}")]
    TriggerNotFound {
        name: String,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },
}

/// Transport errors reported at the call that triggered a flush or attach.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Failed to serialize packet: {message}")]
    SerializationFailed {
        message: String,
    },

    #[error("Failed to decode packet: {message}")]
    DeserializationFailed {
        message: String,
    },

    #[error("Type tag '{tag}' is not registered with the store")]
    UnregisteredType {
        tag: String,
    },

    #[error("Transport kind '{kind}' is not supported")]
    Unsupported {
        kind: String,
    },

    #[error("Transport is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type for swarmkb.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl KbError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is the re-entrant trigger rejection.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Locked))
    }

    /// Returns true if retrying the same call could succeed.
    ///
    /// The core never retries on its own; this only informs caller policy.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            // A re-entrant call is a programming error, not a transient state.
            Self::Execution(_) => false,
            Self::Transport(e) => matches!(
                e,
                TransportError::ConnectionFailed { .. } | TransportError::Io(_)
            ),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for swarmkb operations.
pub type KbResult<T> = Result<T, KbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_ring_id() {
        let err = ValidationError::RingIdOutOfRange { id: 5, size: 3 };
        let msg = format!("{err}");
        assert!(msg.contains('5'));
        assert!(msg.contains("ring size 3"));
    }

    #[test]
    fn test_execution_error_locked() {
        let err: KbError = ExecutionError::Locked.into();
        assert!(err.is_execution());
        assert!(err.is_locked());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("re-entrant"));
    }

    #[test]
    fn test_execution_error_released() {
        let err = ExecutionError::Released {
            name: "counter".to_string(),
        };
        assert!(err.to_string().contains("counter"));
    }

    #[test]
    fn test_transport_error_unregistered() {
        let err: KbError = TransportError::UnregisteredType {
            tag: "pose".to_string(),
        }
        .into();
        assert!(err.is_transport());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("pose"));
    }

    #[test]
    fn test_kb_error_retryable() {
        let err1: KbError = ValidationError::EmptyKey.into();
        assert!(!err1.is_retryable());
        assert!(err1.is_validation());

        let err2: KbError = TransportError::ConnectionFailed {
            message: "refused".to_string(),
        }
        .into();
        assert!(err2.is_retryable());

        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err3: KbError = TransportError::from(io).into();
        assert!(err3.is_retryable());
    }

    #[test]
    fn test_kb_error_internal() {
        let err = KbError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }
}
