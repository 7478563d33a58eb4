//! Broadcast dispatcher.
//!
//! Ingestion sources hand normalized [`Message`]s to the dispatcher, which
//! emits them to every socket in the target rooms. A message that names an
//! originating socket is never echoed back to that socket.

use crate::fanout::Fanout;
use crate::message::Message;
use herald_protocol::ServerFrame;
use std::sync::Arc;
use tracing::trace;

/// Routes ingested messages to rooms.
pub struct Dispatcher {
    fanout: Arc<dyn Fanout>,
}

impl Dispatcher {
    /// Create a dispatcher over a fan-out layer.
    #[must_use]
    pub fn new(fanout: Arc<dyn Fanout>) -> Self {
        Self { fanout }
    }

    /// Emit a message to every socket in a channel except its origin.
    ///
    /// The origin is passed down as an exclusion whenever the message names
    /// one. Excluding a socket that is not in the room leaves the recipient
    /// set unchanged, so producer events without a live origin reach
    /// everyone.
    pub async fn broadcast(&self, channel: &str, message: &Message) {
        trace!(channel = %channel, event = %message.event, origin = ?message.socket_id, "Broadcasting");
        let frame = ServerFrame::event(message.event.as_str(), channel, message.data.clone());
        self.fanout
            .emit_to_room(channel, frame, message.socket_id.as_deref())
            .await;
    }

    /// Emit one message to several channels.
    pub async fn broadcast_to(&self, channels: &[String], message: &Message) {
        for channel in channels {
            self.broadcast(channel, message).await;
        }
    }
}
