//! Normalized broadcast messages.
//!
//! Every ingestion source turns its input into a [`Message`] before handing
//! it to the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event to broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Event name.
    pub event: String,
    /// Event payload, relayed verbatim.
    #[serde(default)]
    pub data: Value,
    /// Socket that caused the event, excluded from delivery.
    #[serde(default, alias = "socket", skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
}

impl Message {
    /// Create a message without an originating socket.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            socket_id: None,
        }
    }

    /// Mark the socket that produced this message.
    #[must_use]
    pub fn with_socket(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }
}
