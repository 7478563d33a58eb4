//! Presence registry.
//!
//! Tracks who is in each presence channel. The member list lives in the
//! [`MembershipStore`] and is a derived view of the fan-out layer's live
//! rooms: every membership query first reconciles the stored list against
//! the sockets actually present, which purges records left behind by
//! connections that vanished without a clean leave.
//!
//! Join and leave notifications are edge-triggered per user: `joining` fires
//! on a user's first live connection to the channel, `leaving` when the last
//! one goes away. Concurrent joins and leaves on one channel may race at the
//! store's read-modify-write; the next reconciliation converges the list.

use crate::channel::members_key;
use crate::fanout::Fanout;
use crate::member::{dedup_by_user, Member};
use crate::store::{MembershipStore, StoreError};
use herald_protocol::ServerFrame;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Per-channel member lists with join/leave notifications.
pub struct PresenceRegistry {
    store: Arc<dyn MembershipStore>,
    fanout: Arc<dyn Fanout>,
}

impl PresenceRegistry {
    /// Create a registry over a store and a fan-out layer.
    #[must_use]
    pub fn new(store: Arc<dyn MembershipStore>, fanout: Arc<dyn Fanout>) -> Self {
        Self { store, fanout }
    }

    /// Stored member records of a channel, in join order, without
    /// reconciliation. Store failures read as an empty list.
    pub async fn get_members(&self, channel: &str) -> Vec<Member> {
        self.read_members(channel).await.unwrap_or_else(|e| {
            error!(channel = %channel, store = self.store.name(), error = %e, "Failed to read members");
            Vec::new()
        })
    }

    /// Whether the candidate's user holds a live record on the channel.
    pub async fn is_member(&self, channel: &str, candidate: &Member) -> bool {
        let members = self.get_members(channel).await;
        self.remove_inactive(channel, members, None)
            .await
            .iter()
            .any(|m| m.same_user(candidate))
    }

    /// Drop records whose socket is no longer live in the channel's room and
    /// persist the result.
    ///
    /// `departing` names a socket to treat as already gone even if the room
    /// still lists it. If the live set cannot be determined the list is
    /// returned untouched and nothing is written.
    pub async fn remove_inactive(
        &self,
        channel: &str,
        members: Vec<Member>,
        departing: Option<&str>,
    ) -> Vec<Member> {
        let mut live = match self.fanout.sockets_in(channel).await {
            Ok(live) => live,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Live sockets unknown, skipping reconciliation");
                return members;
            }
        };
        if let Some(socket) = departing {
            live.remove(socket);
        }

        let before = members.len();
        let members: Vec<Member> = members
            .into_iter()
            .filter(|m| m.socket_id.as_deref().is_some_and(|s| live.contains(s)))
            .collect();

        if members.len() < before {
            debug!(channel = %channel, purged = before - members.len(), "Purged inactive members");
        }

        self.persist(channel, &members).await;
        members
    }

    /// Record a socket joining a presence channel.
    ///
    /// The joining socket always receives the deduplicated member list. The
    /// rest of the channel hears about the user only if this is the user's
    /// first live connection. Returns whether the join was announced.
    pub async fn join(&self, socket_id: &str, channel: &str, member: Option<Member>) -> bool {
        let Some(member) = member else {
            error!(channel = %channel, socket = %socket_id, "Unable to join channel, member data for presence channel missing");
            return false;
        };

        let stored = match self.read_members(channel).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(channel = %channel, socket = %socket_id, store = self.store.name(), error = %e, "Unable to join presence channel, members unreadable");
                return false;
            }
        };
        let mut members = self.remove_inactive(channel, stored, None).await;
        let was_member = members.iter().any(|m| m.same_user(&member));

        let record = member.with_socket(socket_id);
        members.push(record.clone());
        self.persist(channel, &members).await;

        let listing = dedup_by_user(&members);
        self.fanout
            .emit_to_socket(
                socket_id,
                ServerFrame::presence_subscribed(channel, to_value(&listing)),
            )
            .await;

        if was_member {
            trace!(channel = %channel, socket = %socket_id, "Additional connection for present user");
            return false;
        }

        debug!(channel = %channel, socket = %socket_id, user = %record.user_id, "Member joining");
        self.fanout
            .emit_to_room(
                channel,
                ServerFrame::presence_joining(channel, to_value(&record)),
                Some(socket_id),
            )
            .await;
        true
    }

    /// Record a socket leaving a presence channel.
    ///
    /// The leaving socket is treated as already gone from the room. The
    /// channel hears about the user only if no other live connection of the
    /// same user remains. Returns whether the departure was announced.
    pub async fn leave(&self, socket_id: &str, channel: &str) -> bool {
        let mut members = match self.read_members(channel).await {
            Ok(members) => members,
            Err(e) => {
                error!(channel = %channel, socket = %socket_id, store = self.store.name(), error = %e, "Unable to leave presence channel, members unreadable");
                return false;
            }
        };
        let Some(departed) = members
            .iter()
            .find(|m| m.socket_id.as_deref() == Some(socket_id))
            .cloned()
        else {
            trace!(channel = %channel, socket = %socket_id, "No member record for socket");
            return false;
        };

        members.retain(|m| m.socket_id.as_deref() != Some(socket_id));
        self.persist(channel, &members).await;
        let remaining = self.remove_inactive(channel, members, Some(socket_id)).await;

        if remaining.iter().any(|m| m.same_user(&departed)) {
            trace!(channel = %channel, socket = %socket_id, "User still present on another connection");
            return false;
        }

        debug!(channel = %channel, socket = %socket_id, user = %departed.user_id, "Member leaving");
        self.fanout
            .emit_to_room(
                channel,
                ServerFrame::presence_leaving(channel, to_value(&departed.public_view())),
                Some(socket_id),
            )
            .await;
        true
    }

    async fn read_members(&self, channel: &str) -> Result<Vec<Member>, StoreError> {
        match self.store.get(&members_key(channel)).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(channel = %channel, error = %e, "Discarding unreadable member list");
                Vec::new()
            })),
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, channel: &str, members: &[Member]) {
        if let Err(e) = self.store.set(&members_key(channel), to_value(members)).await {
            error!(channel = %channel, store = self.store.name(), error = %e, "Failed to write members");
        }
    }
}

fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{FrameReceiver, LocalFanout};
    use crate::fanout::{FanoutError, SocketId};
    use crate::store::{MemoryStore, UnconfiguredStore};
    use async_trait::async_trait;
    use herald_protocol::events;
    use std::collections::HashSet;
    use serde_json::json;

    struct Fixture {
        hub: Arc<LocalFanout>,
        store: Arc<MemoryStore>,
        registry: PresenceRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let hub = Arc::new(LocalFanout::new());
            let store = Arc::new(MemoryStore::new());
            let registry = PresenceRegistry::new(store.clone(), hub.clone());
            Self {
                hub,
                store,
                registry,
            }
        }

        /// Connect a socket and put it in the room, as the manager does
        /// before delegating to the registry.
        fn connect(&self, socket: &str, channel: &str) -> FrameReceiver {
            let rx = self.hub.register(socket);
            self.hub.join(socket, channel);
            rx
        }

        fn disconnect(&self, socket: &str) {
            self.hub.unregister(socket);
        }
    }

    /// A fan-out layer that cannot tell which sockets are live, like a relay
    /// whose peers stopped answering.
    struct BlindFanout(Arc<LocalFanout>);

    #[async_trait]
    impl Fanout for BlindFanout {
        fn join(&self, socket: &str, channel: &str) {
            self.0.join(socket, channel);
        }

        fn leave(&self, socket: &str, channel: &str) {
            self.0.leave(socket, channel);
        }

        fn rooms(&self, socket: &str) -> Vec<String> {
            self.0.rooms(socket)
        }

        fn in_room(&self, socket: &str, channel: &str) -> bool {
            self.0.in_room(socket, channel)
        }

        async fn sockets_in(&self, _channel: &str) -> Result<HashSet<SocketId>, FanoutError> {
            Err(FanoutError::Timeout {
                expected: 2,
                missing: 1,
            })
        }

        async fn emit_to_room(&self, channel: &str, frame: ServerFrame, except: Option<&str>) {
            self.0.emit_to_room(channel, frame, except).await;
        }

        async fn emit_to_socket(&self, socket: &str, frame: ServerFrame) {
            self.0.emit_to_socket(socket, frame).await;
        }
    }

    fn drain(rx: &mut FrameReceiver) -> Vec<Arc<ServerFrame>> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn count(frames: &[Arc<ServerFrame>], event: &str) -> usize {
        frames.iter().filter(|f| f.event == event).count()
    }

    #[tokio::test]
    async fn test_join_sends_member_list_to_joiner() {
        let fx = Fixture::new();
        let mut rx = fx.connect("a", "presence-room");

        let announced = fx
            .registry
            .join("a", "presence-room", Some(Member::new(1, json!({"name": "Ada"}))))
            .await;
        assert!(announced);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, events::PRESENCE_SUBSCRIBED);
        assert_eq!(frames[0].channel.as_deref(), Some("presence-room"));
        assert_eq!(
            frames[0].data,
            json!([{"user_id": 1, "user_info": {"name": "Ada"}, "socketId": "a"}])
        );
    }

    #[tokio::test]
    async fn test_missing_member_abandons_join() {
        let fx = Fixture::new();
        let mut rx = fx.connect("a", "presence-room");

        assert!(!fx.registry.join("a", "presence-room", None).await);
        assert!(drain(&mut rx).is_empty());
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_dedup_across_connections() {
        let fx = Fixture::new();
        let mut receivers = Vec::new();
        for socket in ["a", "b", "c"] {
            receivers.push(fx.connect(socket, "presence-room"));
            fx.registry
                .join(socket, "presence-room", Some(Member::new(1, json!({"tab": socket}))))
                .await;
        }

        let stored = fx.registry.get_members("presence-room").await;
        assert_eq!(stored.len(), 3);

        let listing = dedup_by_user(&stored);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].user_info, json!({"tab": "c"}));

        // The last joiner saw a single, most recent entry
        let frames = drain(&mut receivers[2]);
        let subscribed = frames
            .iter()
            .find(|f| f.event == events::PRESENCE_SUBSCRIBED)
            .unwrap();
        assert_eq!(subscribed.data.as_array().unwrap().len(), 1);
        assert_eq!(subscribed.data[0]["user_info"], json!({"tab": "c"}));
    }

    #[tokio::test]
    async fn test_joining_fires_once_per_user() {
        let fx = Fixture::new();
        let mut observer = fx.connect("observer", "presence-room");
        fx.registry
            .join("observer", "presence-room", Some(Member::new(99, Value::Null)))
            .await;
        drain(&mut observer);

        let mut announced = Vec::new();
        let mut _receivers = Vec::new();
        for socket in ["a", "b", "c"] {
            _receivers.push(fx.connect(socket, "presence-room"));
            announced.push(
                fx.registry
                    .join(socket, "presence-room", Some(Member::new(1, Value::Null)))
                    .await,
            );
        }

        assert_eq!(announced, vec![true, false, false]);
        let frames = drain(&mut observer);
        assert_eq!(count(&frames, events::PRESENCE_JOINING), 1);
    }

    #[tokio::test]
    async fn test_joining_not_sent_to_joiner() {
        let fx = Fixture::new();
        let mut rx = fx.connect("a", "presence-room");
        fx.registry
            .join("a", "presence-room", Some(Member::new(1, Value::Null)))
            .await;

        assert_eq!(count(&drain(&mut rx), events::PRESENCE_JOINING), 0);
    }

    #[tokio::test]
    async fn test_leaving_fires_on_last_connection() {
        let fx = Fixture::new();
        let mut observer = fx.connect("observer", "presence-room");
        fx.registry
            .join("observer", "presence-room", Some(Member::new(99, Value::Null)))
            .await;

        let mut _receivers = Vec::new();
        for socket in ["a", "b", "c"] {
            _receivers.push(fx.connect(socket, "presence-room"));
            fx.registry
                .join(socket, "presence-room", Some(Member::new(1, json!({"name": "Ada"}))))
                .await;
        }
        drain(&mut observer);

        let mut announced = Vec::new();
        for socket in ["a", "b", "c"] {
            announced.push(fx.registry.leave(socket, "presence-room").await);
            fx.hub.leave(socket, "presence-room");
        }
        assert_eq!(announced, vec![false, false, true]);

        let frames = drain(&mut observer);
        assert_eq!(count(&frames, events::PRESENCE_LEAVING), 1);
        let leaving = frames
            .iter()
            .find(|f| f.event == events::PRESENCE_LEAVING)
            .unwrap();
        // The departed record is published without its socket
        assert_eq!(leaving.data, json!({"user_id": 1, "user_info": {"name": "Ada"}}));
    }

    #[tokio::test]
    async fn test_leaving_not_sent_to_leaver() {
        let fx = Fixture::new();
        let mut rx = fx.connect("a", "presence-room");
        fx.registry
            .join("a", "presence-room", Some(Member::new(1, Value::Null)))
            .await;
        drain(&mut rx);

        assert!(fx.registry.leave("a", "presence-room").await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_leave_without_record_is_noop() {
        let fx = Fixture::new();
        let _rx = fx.connect("a", "presence-room");

        assert!(!fx.registry.leave("a", "presence-room").await);
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_reconciliation_purges_dead_sockets() {
        let fx = Fixture::new();
        let _rx = fx.connect("live", "presence-room");
        fx.store
            .set(
                &members_key("presence-room"),
                json!([
                    {"user_id": 1, "user_info": null, "socketId": "gone"},
                    {"user_id": 2, "user_info": null, "socketId": "live"}
                ]),
            )
            .await
            .unwrap();

        assert!(!fx.registry.is_member("presence-room", &Member::new(1, Value::Null)).await);
        assert!(fx.registry.is_member("presence-room", &Member::new(2, Value::Null)).await);

        // The reduction was persisted
        let stored = fx.registry.get_members("presence-room").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].socket_id.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn test_crashed_connection_does_not_suppress_joining() {
        let fx = Fixture::new();
        let mut observer = fx.connect("observer", "presence-room");
        fx.registry
            .join("observer", "presence-room", Some(Member::new(99, Value::Null)))
            .await;

        let _rx = fx.connect("a", "presence-room");
        fx.registry
            .join("a", "presence-room", Some(Member::new(1, Value::Null)))
            .await;

        // Socket vanishes without a leave; its record stays behind
        fx.disconnect("a");
        drain(&mut observer);

        let _rx = fx.connect("b", "presence-room");
        let announced = fx
            .registry
            .join("b", "presence-room", Some(Member::new(1, Value::Null)))
            .await;

        assert!(announced);
        assert_eq!(count(&drain(&mut observer), events::PRESENCE_JOINING), 1);
    }

    #[tokio::test]
    async fn test_two_tab_scenario() {
        let fx = Fixture::new();
        let member = || Some(Member::new(1, json!({"name": "Ada"})));

        let mut observer = fx.connect("observer", "presence-room");
        fx.registry
            .join("observer", "presence-room", Some(Member::new(2, Value::Null)))
            .await;

        let mut rx_a = fx.connect("a", "presence-room");
        assert!(fx.registry.join("a", "presence-room", member()).await);
        let subscribed_a = drain(&mut rx_a);
        assert_eq!(subscribed_a[0].event, events::PRESENCE_SUBSCRIBED);

        let mut rx_b = fx.connect("b", "presence-room");
        assert!(!fx.registry.join("b", "presence-room", member()).await);
        let subscribed_b = drain(&mut rx_b);
        let users: Vec<_> = subscribed_b[0]
            .data
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["user_id"] == json!(1))
            .collect();
        assert_eq!(users.len(), 1);

        // A drops: B still holds the user
        assert!(!fx.registry.leave("a", "presence-room").await);
        fx.hub.leave("a", "presence-room");
        // B drops: the user is gone
        assert!(fx.registry.leave("b", "presence-room").await);
        fx.hub.leave("b", "presence-room");

        let frames = drain(&mut observer);
        assert_eq!(count(&frames, events::PRESENCE_JOINING), 1);
        assert_eq!(count(&frames, events::PRESENCE_LEAVING), 1);
    }

    #[tokio::test]
    async fn test_unknown_live_set_keeps_stored_list() {
        let hub = Arc::new(LocalFanout::new());
        let store = Arc::new(MemoryStore::new());
        let registry = PresenceRegistry::new(store.clone(), Arc::new(BlindFanout(hub.clone())));
        let stored = json!([{"user_id": 1, "user_info": null, "socketId": "gone"}]);
        store
            .set(&members_key("presence-room"), stored.clone())
            .await
            .unwrap();

        // Without a live set the dead record cannot be told apart
        assert!(registry.is_member("presence-room", &Member::new(1, Value::Null)).await);
        assert_eq!(
            store.get(&members_key("presence-room")).await.unwrap(),
            Some(stored)
        );
    }

    #[tokio::test]
    async fn test_unknown_live_set_still_pairs_join_and_leave() {
        let hub = Arc::new(LocalFanout::new());
        let store = Arc::new(MemoryStore::new());
        let registry = PresenceRegistry::new(store.clone(), Arc::new(BlindFanout(hub.clone())));
        let mut observer = hub.register("observer");
        hub.join("observer", "presence-room");
        let _rx = hub.register("a");
        hub.join("a", "presence-room");

        assert!(registry.join("a", "presence-room", Some(Member::new(1, Value::Null))).await);
        assert!(registry.leave("a", "presence-room").await);

        let frames = drain(&mut observer);
        assert_eq!(count(&frames, events::PRESENCE_JOINING), 1);
        assert_eq!(count(&frames, events::PRESENCE_LEAVING), 1);
        assert!(registry.get_members("presence-room").await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_store_announces_nothing() {
        let hub = Arc::new(LocalFanout::new());
        let registry = PresenceRegistry::new(
            Arc::new(UnconfiguredStore::new("database driver not set")),
            hub.clone(),
        );
        let mut observer = hub.register("observer");
        hub.join("observer", "presence-room");
        let mut rx = hub.register("a");
        hub.join("a", "presence-room");

        assert!(!registry.join("a", "presence-room", Some(Member::new(1, Value::Null))).await);
        assert!(!registry.leave("a", "presence-room").await);

        // Store errors read as no members
        assert!(registry.get_members("presence-room").await.is_empty());
        assert!(!registry.is_member("presence-room", &Member::new(1, Value::Null)).await);
        assert!(drain(&mut rx).is_empty());
        let frames = drain(&mut observer);
        assert_eq!(count(&frames, events::PRESENCE_JOINING), 0);
        assert_eq!(count(&frames, events::PRESENCE_LEAVING), 0);
    }
}
