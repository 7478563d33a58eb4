//! Presence channel members.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One authenticated user's presence on a channel, held by one socket.
///
/// The same user may appear several times on a channel (several tabs or
/// devices), each record carrying a different `socket_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// User identity, as supplied by the authorization endpoint.
    #[serde(default)]
    pub user_id: Value,
    /// Opaque user payload shown to other participants.
    #[serde(default)]
    pub user_info: Value,
    /// Socket currently holding this record.
    #[serde(
        default,
        rename = "socketId",
        alias = "socket_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub socket_id: Option<String>,
    /// Any additional fields from the authorization payload, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Member {
    /// Create a member for a user.
    #[must_use]
    pub fn new(user_id: impl Into<Value>, user_info: Value) -> Self {
        Self {
            user_id: user_id.into(),
            user_info,
            socket_id: None,
            extra: Map::new(),
        }
    }

    /// Set the socket holding this record.
    #[must_use]
    pub fn with_socket(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }

    /// Build a member from an authorization `channel_data` payload.
    ///
    /// A JSON object (or a string containing one) is read as a member. A
    /// string that is not JSON is taken as the user id itself. Returns `None`
    /// for payloads that carry no usable identity (`null`).
    #[must_use]
    pub fn from_channel_data(channel_data: &Value) -> Option<Self> {
        match channel_data {
            Value::Null => None,
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(parsed @ Value::Object(_)) => serde_json::from_value(parsed).ok(),
                _ => Some(Self::new(raw.clone(), Value::Null)),
            },
            Value::Object(_) => serde_json::from_value(channel_data.clone()).ok(),
            other => Some(Self::new(other.clone(), Value::Null)),
        }
    }

    /// Whether both records belong to the same user.
    #[must_use]
    pub fn same_user(&self, other: &Member) -> bool {
        user_key(&self.user_id) == user_key(&other.user_id)
    }

    /// The record as shown to other participants, without its socket.
    #[must_use]
    pub fn public_view(&self) -> Member {
        Member {
            socket_id: None,
            ..self.clone()
        }
    }
}

/// Comparable form of a user id.
///
/// Numeric and string ids compare equal when they print the same, so a user
/// authorized as `1` on one request and `"1"` on another is one user.
fn user_key(user_id: &Value) -> String {
    match user_id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collapse member records to one per user, most recent record first.
///
/// The stored list is in join order, so it is walked from the end and the
/// first record seen for each user wins.
#[must_use]
pub fn dedup_by_user(members: &[Member]) -> Vec<Member> {
    let mut seen = HashSet::new();
    members
        .iter()
        .rev()
        .filter(|m| seen.insert(user_key(&m.user_id)))
        .cloned()
        .collect()
}
