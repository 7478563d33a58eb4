//! Channel manager.
//!
//! Entry point for everything a socket does to channels: subscribing
//! (with authorization for private and presence channels), unsubscribing,
//! disconnecting, and relaying client events to other members.

use crate::auth::{AuthRequest, Authenticator};
use crate::channel::{is_presence, validate_channel_name, ChannelKind, ChannelRules};
use crate::fanout::{Fanout, SocketInfo};
use crate::member::Member;
use crate::presence::PresenceRegistry;
use crate::store::MembershipStore;
use herald_protocol::{ServerFrame, Subscription};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The socket is now in the room.
    Joined {
        /// A presence channel announced the user as joining.
        announced: bool,
    },
    /// Authorization was refused with this status.
    Rejected {
        /// Status reported to the socket.
        status: u16,
    },
    /// Nothing happened: bad channel name, or the socket went away while
    /// the request was being authorized.
    Ignored,
}

/// A client-to-client event.
#[derive(Debug, Deserialize)]
struct ClientEvent {
    event: String,
    channel: String,
    #[serde(default)]
    data: Value,
}

/// Classifies, authorizes and routes channel operations for sockets.
pub struct ChannelManager {
    rules: ChannelRules,
    authenticator: Arc<dyn Authenticator>,
    presence: PresenceRegistry,
    fanout: Arc<dyn Fanout>,
}

impl ChannelManager {
    /// Create a channel manager.
    #[must_use]
    pub fn new(
        rules: ChannelRules,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn MembershipStore>,
        fanout: Arc<dyn Fanout>,
    ) -> Self {
        Self {
            rules,
            authenticator,
            presence: PresenceRegistry::new(store, Arc::clone(&fanout)),
            fanout,
        }
    }

    /// Classification rules in use.
    #[must_use]
    pub fn rules(&self) -> &ChannelRules {
        &self.rules
    }

    /// The presence registry.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Whether the channel requires authorization.
    #[must_use]
    pub fn is_private(&self, channel: &str) -> bool {
        self.rules.is_private(channel)
    }

    /// Whether the channel tracks presence.
    #[must_use]
    pub fn is_presence(&self, channel: &str) -> bool {
        is_presence(channel)
    }

    /// Handle a subscribe request.
    ///
    /// Public channels are joined directly. Private and presence channels
    /// are joined only after the authenticator accepts; a refusal is
    /// reported to this socket alone as `subscription_error`.
    pub async fn join(&self, socket: &SocketInfo, subscription: Subscription) -> JoinOutcome {
        let Subscription { channel, auth } = subscription;

        if let Err(reason) = validate_channel_name(&channel) {
            debug!(socket = %socket.id, channel = %channel, reason, "Ignoring subscribe");
            return JoinOutcome::Ignored;
        }

        let kind = self.rules.classify(&channel);
        if kind == ChannelKind::Public {
            self.fanout.join(&socket.id, &channel);
            debug!(socket = %socket.id, channel = %channel, "Joined channel");
            return JoinOutcome::Joined { announced: false };
        }

        let mut headers = socket.handshake.clone();
        if let Some(auth) = auth {
            headers.extend(auth.headers);
        }
        let request = AuthRequest {
            channel: channel.clone(),
            socket_id: socket.id.clone(),
            headers,
        };

        let response = match self.authenticator.authorize(&request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(socket = %socket.id, channel = %channel, status = e.status, reason = %e.reason, "Authorization failed");
                self.fanout
                    .emit_to_socket(&socket.id, ServerFrame::subscription_error(&channel, e.status))
                    .await;
                return JoinOutcome::Rejected { status: e.status };
            }
        };

        self.fanout.join(&socket.id, &channel);
        if !self.fanout.in_room(&socket.id, &channel) {
            debug!(socket = %socket.id, channel = %channel, "Socket gone before authorization completed");
            return JoinOutcome::Ignored;
        }

        let mut announced = false;
        if kind == ChannelKind::Presence {
            let member = response
                .channel_data
                .as_ref()
                .and_then(Member::from_channel_data);
            announced = self.presence.join(&socket.id, &channel, member).await;
        }

        debug!(socket = %socket.id, channel = %channel, announced, "Joined channel");
        JoinOutcome::Joined { announced }
    }

    /// Handle a socket leaving a channel. Leaving a channel that was never
    /// joined does nothing.
    ///
    /// For presence channels the registry runs first, treating the socket as
    /// already gone, so the departure notice reaches only the remaining
    /// members. Returns whether a departure was announced.
    pub async fn leave(&self, socket_id: &str, channel: &str, reason: &str) -> bool {
        if channel.is_empty() {
            return false;
        }

        let announced = is_presence(channel) && self.presence.leave(socket_id, channel).await;

        self.fanout.leave(socket_id, channel);
        debug!(socket = %socket_id, channel = %channel, reason, announced, "Left channel");
        announced
    }

    /// Leave every channel the socket occupies, as on disconnect. Returns
    /// the number of announced presence departures.
    pub async fn leave_all(&self, socket_id: &str, reason: &str) -> usize {
        let mut announced = 0;
        for channel in self.fanout.rooms(socket_id) {
            if self.leave(socket_id, &channel, reason).await {
                announced += 1;
            }
        }
        announced
    }

    /// Relay a client event to the other members of a channel.
    ///
    /// The payload may be the `{event, channel, data}` object or a JSON
    /// string of it. It is relayed only when the event name is allowed, the
    /// channel is private or presence, and the socket is in that channel.
    /// Anything else is dropped without telling the client. Returns whether
    /// the event was relayed.
    pub async fn client_event(&self, socket_id: &str, payload: Value) -> bool {
        let payload = match payload {
            Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            other => other,
        };

        let Ok(ClientEvent {
            event,
            channel,
            data,
        }) = serde_json::from_value::<ClientEvent>(payload)
        else {
            trace!(socket = %socket_id, "Dropping malformed client event");
            return false;
        };

        if !self.rules.is_client_event(&event)
            || !self.rules.is_private(&channel)
            || !self.fanout.in_room(socket_id, &channel)
        {
            trace!(socket = %socket_id, channel = %channel, event = %event, "Dropping unauthorized client event");
            return false;
        }

        self.fanout
            .emit_to_room(
                &channel,
                ServerFrame::event(event, channel.as_str(), data),
                Some(socket_id),
            )
            .await;
        true
    }
}
