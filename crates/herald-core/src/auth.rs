//! Authorization contract for private and presence channels.
//!
//! The relay does not judge credentials itself. It forwards the subscribe
//! request to an external authority and trusts the answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// A request to join a private or presence channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Channel the socket wants to join.
    pub channel: String,
    /// Requesting socket.
    pub socket_id: String,
    /// Candidate credentials: headers from the subscribe request merged over
    /// the socket's handshake headers.
    pub headers: BTreeMap<String, String>,
}

/// A successful authorization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Channel-scoped payload. For presence channels this describes the
    /// member, either as an object or as a JSON-encoded string.
    #[serde(default)]
    pub channel_data: Option<Value>,
}

/// A refused or failed authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Authorization failed with status {status}: {reason}")]
pub struct AuthError {
    /// Status reported to the requesting socket.
    pub status: u16,
    /// Explanation, for logs only.
    pub reason: String,
}

impl AuthError {
    /// Create an authorization error.
    #[must_use]
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// External authority deciding private channel subscriptions.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authorize a socket for a channel.
    async fn authorize(&self, request: &AuthRequest) -> Result<AuthResponse, AuthError>;
}
