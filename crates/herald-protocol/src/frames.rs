//! Frame types for the Herald socket protocol.
//!
//! Clients send [`ClientFrame`]s, the relay answers with [`ServerFrame`]s.
//! Every server frame mirrors an `emit(event, channel, data)` call: the event
//! name, the channel it concerns (if any) and an opaque JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved event names emitted by the relay itself.
pub mod events {
    pub const CONNECTED: &str = "connected";
    pub const PONG: &str = "pong";
    pub const SUBSCRIPTION_ERROR: &str = "subscription_error";
    pub const PRESENCE_SUBSCRIBED: &str = "presence:subscribed";
    pub const PRESENCE_JOINING: &str = "presence:joining";
    pub const PRESENCE_LEAVING: &str = "presence:leaving";
}

/// Authorization options attached to a subscribe request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthOptions {
    /// Headers forwarded verbatim to the authorization endpoint.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Payload of a `subscribe` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Channel to join.
    pub channel: String,
    /// Credentials for private and presence channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthOptions>,
}

impl Subscription {
    /// Create a subscription request without credentials.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            auth: None,
        }
    }

    /// Attach an authorization header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth
            .get_or_insert_with(AuthOptions::default)
            .headers
            .insert(name.into(), value.into());
        self
    }
}

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Join a channel.
    #[serde(rename = "subscribe")]
    Subscribe(Subscription),

    /// Leave a channel.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Channel to leave.
        channel: String,
    },

    /// Client-to-client signal, `{event, channel, data}`.
    ///
    /// Kept as raw JSON: clients may send the object itself or a
    /// JSON-encoded string of it, and malformed payloads are dropped by the
    /// channel manager rather than rejected here.
    #[serde(rename = "client event")]
    ClientEvent(Value),

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping,
}

/// A frame sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Event name.
    pub event: String,
    /// Channel the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl ServerFrame {
    /// Create an application event relayed to a channel.
    #[must_use]
    pub fn event(event: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: Some(channel.into()),
            data,
        }
    }

    /// Handshake frame carrying the id the relay assigned to the socket.
    #[must_use]
    pub fn connected(socket_id: impl Into<String>) -> Self {
        Self {
            event: events::CONNECTED.to_string(),
            channel: None,
            data: serde_json::json!({ "socket_id": socket_id.into() }),
        }
    }

    /// Keepalive answer.
    #[must_use]
    pub fn pong() -> Self {
        Self {
            event: events::PONG.to_string(),
            channel: None,
            data: Value::Null,
        }
    }

    /// Authorization failure for a subscribe request.
    #[must_use]
    pub fn subscription_error(channel: impl Into<String>, status: u16) -> Self {
        Self::event(events::SUBSCRIPTION_ERROR, channel, Value::from(status))
    }

    /// Full, deduplicated member list sent to a socket that just joined.
    #[must_use]
    pub fn presence_subscribed(channel: impl Into<String>, members: Value) -> Self {
        Self::event(events::PRESENCE_SUBSCRIBED, channel, members)
    }

    /// A user's first connection to a presence channel.
    #[must_use]
    pub fn presence_joining(channel: impl Into<String>, member: Value) -> Self {
        Self::event(events::PRESENCE_JOINING, channel, member)
    }

    /// A user's last connection to a presence channel went away.
    #[must_use]
    pub fn presence_leaving(channel: impl Into<String>, member: Value) -> Self {
        Self::event(events::PRESENCE_LEAVING, channel, member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frame_subscribe_wire_shape() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "event": "subscribe",
            "data": {
                "channel": "presence-room",
                "auth": { "headers": { "Authorization": "Bearer abc" } }
            }
        }))
        .unwrap();

        let expected = ClientFrame::Subscribe(
            Subscription::new("presence-room").with_header("Authorization", "Bearer abc"),
        );
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_client_frame_without_auth() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"event":"subscribe","data":{"channel":"chat"}}"#).unwrap();
        assert_eq!(frame, ClientFrame::Subscribe(Subscription::new("chat")));
    }

    #[test]
    fn test_client_event_keeps_raw_payload() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"event":"client event","data":"{\"event\":\"client-typing\"}"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::ClientEvent(Value::String(r#"{"event":"client-typing"}"#.into()))
        );
    }

    #[test]
    fn test_ping_without_data() {
        let frame: ClientFrame = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn test_server_frame_shapes() {
        let frame = ServerFrame::subscription_error("private-chat", 403);
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "subscription_error", "channel": "private-chat", "data": 403})
        );

        let frame = ServerFrame::connected("abc");
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "connected", "data": {"socket_id": "abc"}})
        );
    }
}
