//! Single-node connection hub.
//!
//! The hub keeps every socket connected to this process, the rooms they
//! occupy, and an outbound queue per socket. It implements [`Fanout`] on its
//! own for single-node deployments and is the local delivery layer of the
//! cluster relay.

use crate::channel::ChannelId;
use crate::fanout::{Fanout, FanoutError, SocketId};
use async_trait::async_trait;
use dashmap::DashMap;
use herald_protocol::ServerFrame;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Outbound queue of a socket.
pub type FrameSender = mpsc::UnboundedSender<Arc<ServerFrame>>;

/// Receiving half of a socket's outbound queue.
pub type FrameReceiver = mpsc::UnboundedReceiver<Arc<ServerFrame>>;

/// A room: the set of local sockets subscribed to one channel.
#[derive(Debug)]
struct Room {
    name: ChannelId,
    subscribers: HashSet<SocketId>,
}

impl Room {
    fn new(name: impl Into<ChannelId>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashSet::new(),
        }
    }
}

/// A registered socket.
#[derive(Debug)]
struct SocketEntry {
    sender: FrameSender,
    rooms: HashSet<ChannelId>,
}

/// Hub statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    /// Number of connected sockets.
    pub connection_count: usize,
    /// Number of occupied rooms.
    pub room_count: usize,
    /// Total number of room memberships.
    pub total_subscriptions: usize,
}

/// The local set of live sockets grouped into rooms.
#[derive(Debug, Default)]
pub struct LocalFanout {
    /// Rooms indexed by channel name. Empty rooms are removed.
    rooms: DashMap<ChannelId, Room>,
    /// Sockets indexed by id.
    sockets: DashMap<SocketId, SocketEntry>,
}

impl LocalFanout {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        info!("Creating local connection hub");
        Self::default()
    }

    /// Register a connected socket and return its outbound queue.
    pub fn register(&self, socket: impl Into<SocketId>) -> FrameReceiver {
        let socket = socket.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        debug!(socket = %socket, "Socket registered");
        self.sockets.insert(
            socket,
            SocketEntry {
                sender,
                rooms: HashSet::new(),
            },
        );
        receiver
    }

    /// Forget a socket and drop it from every room it still occupies.
    pub fn unregister(&self, socket: &str) {
        if let Some((_, entry)) = self.sockets.remove(socket) {
            for channel in &entry.rooms {
                self.remove_from_room(socket, channel);
            }
        }
        debug!(socket = %socket, "Socket unregistered");
    }

    /// Whether a socket is connected to this process.
    #[must_use]
    pub fn is_connected(&self, socket: &str) -> bool {
        self.sockets.contains_key(socket)
    }

    /// Local sockets in a room.
    #[must_use]
    pub fn local_sockets_in(&self, channel: &str) -> HashSet<SocketId> {
        self.rooms
            .get(channel)
            .map(|room| room.subscribers.clone())
            .unwrap_or_default()
    }

    /// Deliver a frame to the local members of a room.
    ///
    /// Returns the number of sockets the frame was queued for.
    pub fn deliver(&self, channel: &str, frame: ServerFrame, except: Option<&str>) -> usize {
        // Collect first so no room lock is held while socket entries are read.
        let recipients: Vec<SocketId> = match self.rooms.get(channel) {
            Some(room) => room
                .subscribers
                .iter()
                .filter(|id| Some(id.as_str()) != except)
                .cloned()
                .collect(),
            None => return 0,
        };

        let frame = Arc::new(frame);
        let delivered = recipients
            .iter()
            .filter(|id| self.send_shared(id, Arc::clone(&frame)))
            .count();

        trace!(channel = %channel, recipients = delivered, event = %frame.event, "Delivered to room");
        delivered
    }

    /// Deliver a frame to one local socket. Returns `false` if it is not here.
    pub fn send_to(&self, socket: &str, frame: ServerFrame) -> bool {
        self.send_shared(socket, Arc::new(frame))
    }

    fn send_shared(&self, socket: &str, frame: Arc<ServerFrame>) -> bool {
        self.sockets
            .get(socket)
            .map(|entry| entry.sender.send(frame).is_ok())
            .unwrap_or(false)
    }

    /// Number of local sockets in a room.
    #[must_use]
    pub fn room_size(&self, channel: &str) -> usize {
        self.rooms
            .get(channel)
            .map(|room| room.subscribers.len())
            .unwrap_or(0)
    }

    /// Occupied rooms with their local subscriber counts.
    #[must_use]
    pub fn room_sizes(&self) -> Vec<(ChannelId, usize)> {
        self.rooms
            .iter()
            .map(|room| (room.name.clone(), room.subscribers.len()))
            .collect()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection_count: self.sockets.len(),
            room_count: self.rooms.len(),
            total_subscriptions: self.rooms.iter().map(|r| r.subscribers.len()).sum(),
        }
    }

    fn remove_from_room(&self, socket: &str, channel: &str) {
        let now_empty = match self.rooms.get_mut(channel) {
            Some(mut room) => {
                room.subscribers.remove(socket);
                room.subscribers.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.rooms.remove_if(channel, |_, room| room.subscribers.is_empty());
            debug!(channel = %channel, "Deleted empty room");
        }
    }
}

#[async_trait]
impl Fanout for LocalFanout {
    fn join(&self, socket: &str, channel: &str) {
        match self.sockets.get_mut(socket) {
            Some(mut entry) => {
                entry.rooms.insert(channel.to_string());
            }
            None => {
                debug!(socket = %socket, channel = %channel, "Join from unknown socket ignored");
                return;
            }
        }

        let subscribers = {
            let mut room = self
                .rooms
                .entry(channel.to_string())
                .or_insert_with(|| Room::new(channel));
            room.subscribers.insert(socket.to_string());
            room.subscribers.len()
        };

        debug!(channel = %channel, socket = %socket, subscribers, "Joined room");
    }

    fn leave(&self, socket: &str, channel: &str) {
        let was_member = self
            .sockets
            .get_mut(socket)
            .map(|mut entry| entry.rooms.remove(channel))
            .unwrap_or(false);

        if was_member {
            self.remove_from_room(socket, channel);
            debug!(channel = %channel, socket = %socket, "Left room");
        }
    }

    fn rooms(&self, socket: &str) -> Vec<String> {
        self.sockets
            .get(socket)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn in_room(&self, socket: &str, channel: &str) -> bool {
        self.sockets
            .get(socket)
            .map(|entry| entry.rooms.contains(channel))
            .unwrap_or(false)
    }

    async fn sockets_in(&self, channel: &str) -> Result<HashSet<SocketId>, FanoutError> {
        Ok(self.local_sockets_in(channel))
    }

    async fn emit_to_room(&self, channel: &str, frame: ServerFrame, except: Option<&str>) {
        self.deliver(channel, frame, except);
    }

    async fn emit_to_socket(&self, socket: &str, frame: ServerFrame) {
        if !self.send_to(socket, frame) {
            trace!(socket = %socket, "Emit to disconnected socket dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_leave_rooms() {
        let hub = LocalFanout::new();
        let _rx = hub.register("s1");

        hub.join("s1", "chat");
        hub.join("s1", "chat");
        assert!(hub.in_room("s1", "chat"));
        assert_eq!(hub.room_size("chat"), 1);
        assert_eq!(hub.rooms("s1"), vec!["chat".to_string()]);

        hub.leave("s1", "chat");
        assert!(!hub.in_room("s1", "chat"));
        // Empty rooms are deleted
        assert_eq!(hub.stats().room_count, 0);

        // Leaving again is a no-op
        hub.leave("s1", "chat");
    }

    #[test]
    fn test_unknown_socket_cannot_join() {
        let hub = LocalFanout::new();
        hub.join("ghost", "chat");
        assert_eq!(hub.room_size("chat"), 0);
    }

    #[test]
    fn test_deliver_with_exclusion() {
        let hub = LocalFanout::new();
        let mut rx1 = hub.register("s1");
        let mut rx2 = hub.register("s2");
        let mut rx3 = hub.register("s3");
        hub.join("s1", "chat");
        hub.join("s2", "chat");

        let count = hub.deliver("chat", ServerFrame::event("msg", "chat", json!(1)), Some("s1"));
        assert_eq!(count, 1);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().event, "msg");
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_unregister_clears_rooms() {
        let hub = LocalFanout::new();
        let _rx1 = hub.register("s1");
        let _rx2 = hub.register("s2");
        hub.join("s1", "a");
        hub.join("s1", "b");
        hub.join("s2", "a");

        hub.unregister("s1");

        assert!(!hub.is_connected("s1"));
        assert_eq!(hub.room_size("a"), 1);
        assert_eq!(hub.room_size("b"), 0);
        assert_eq!(
            hub.stats(),
            HubStats {
                connection_count: 1,
                room_count: 1,
                total_subscriptions: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_sockets_in_reports_room_members() {
        let hub = LocalFanout::new();
        let _rx1 = hub.register("s1");
        let _rx2 = hub.register("s2");
        hub.join("s1", "presence-room");

        let live = hub.sockets_in("presence-room").await.unwrap();
        assert_eq!(live, HashSet::from(["s1".to_string()]));
        assert!(hub.sockets_in("empty").await.unwrap().is_empty());
    }
}
