//! Membership store abstraction.
//!
//! The presence registry persists each channel's member list as one JSON
//! value under `"<channel>:members"`. Backends only need single-key `get` and
//! `set`; no atomicity beyond that is assumed.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No backend was configured, or the configured one failed to start.
    #[error("Membership store not configured: {0}")]
    NotConfigured(String),

    /// The backend could not be reached or rejected the operation.
    #[error("Membership store backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("Membership store value error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value persistence for member lists.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Read a value. Missing keys yield `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Backend name, for logs.
    fn name(&self) -> &'static str;
}

/// In-process store for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Value>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Placeholder used when no usable backend is configured.
///
/// Every operation fails, so presence degrades to "no members" while plain
/// broadcasting keeps working.
#[derive(Debug, Clone)]
pub struct UnconfiguredStore {
    reason: String,
}

impl UnconfiguredStore {
    /// Create a placeholder carrying the configuration problem.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl MembershipStore for UnconfiguredStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::NotConfigured(self.reason.clone()))
    }

    async fn set(&self, key: &str, _value: Value) -> Result<(), StoreError> {
        error!(key = %key, reason = %self.reason, "Dropping write, membership store not configured");
        Err(StoreError::NotConfigured(self.reason.clone()))
    }

    fn name(&self) -> &'static str {
        "unconfigured"
    }
}
