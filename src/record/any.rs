//! Registered user payloads ("Any" records).
//!
//! An `AnyValue` carries a type tag plus serde-encoded bytes. The store keeps
//! a registry of accepted tags; transports refuse to serialize records whose
//! tag was never registered.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// An opaque user-typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyValue {
    tag: String,
    bytes: Vec<u8>,
}

impl AnyValue {
    /// Encode `value` under `tag`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::SerializationFailed` if `value` cannot be
    /// encoded.
    pub fn encode<T: Serialize>(tag: impl Into<String>, value: &T) -> Result<Self, TransportError> {
        let bytes = serde_json::to_vec(value).map_err(|e| TransportError::SerializationFailed {
            message: e.to_string(),
        })?;
        Ok(Self {
            tag: tag.into(),
            bytes,
        })
    }

    /// Wrap already-encoded bytes.
    #[must_use]
    pub fn from_raw(tag: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            bytes,
        }
    }

    /// Decode the payload back into `T`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::DeserializationFailed` if the bytes do not
    /// describe a `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.bytes).map_err(|e| TransportError::DeserializationFailed {
            message: format!("any<{}>: {e}", self.tag),
        })
    }

    /// The registered type tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The encoded payload.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Set of type tags a store is willing to put on the wire.
#[derive(Debug, Default)]
pub struct AnyRegistry {
    tags: RwLock<BTreeSet<String>>,
}

impl AnyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Returns false if it was already present.
    pub fn register(&self, tag: impl Into<String>) -> bool {
        self.tags.write().insert(tag.into())
    }

    /// True if `tag` has been registered.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.read().contains(tag)
    }

    /// Fail with `UnregisteredType` unless `tag` is known.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::UnregisteredType` for unknown tags.
    pub fn check(&self, tag: &str) -> Result<(), TransportError> {
        if self.contains(tag) {
            Ok(())
        } else {
            Err(TransportError::UnregisteredType {
                tag: tag.to_string(),
            })
        }
    }

    /// Registered tags in sorted order.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.tags.read().iter().cloned().collect()
    }
}
