//! Connection fan-out capability.
//!
//! The fan-out layer owns the live set of sockets and the rooms they occupy.
//! The presence registry, channel manager and dispatcher only see it through
//! [`Fanout`], so a single-node hub and a multi-instance relay are
//! interchangeable.

use async_trait::async_trait;
use herald_protocol::ServerFrame;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// A socket identifier.
pub type SocketId = String;

/// Fan-out errors.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// Other instances did not answer a membership query in time.
    #[error("Timed out waiting for {missing} of {expected} instance responses")]
    Timeout {
        /// Responses that were expected.
        expected: usize,
        /// Responses still missing at the deadline.
        missing: usize,
    },

    /// The relay between instances failed.
    #[error("Relay error: {0}")]
    Relay(String),
}

/// A connected socket as seen by the channel manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketInfo {
    /// Socket identifier.
    pub id: SocketId,
    /// Selected headers from the connection handshake, forwarded when the
    /// socket asks to join a private channel (cookies, mostly).
    pub handshake: BTreeMap<String, String>,
}

impl SocketInfo {
    /// Describe a socket without handshake headers.
    #[must_use]
    pub fn new(id: impl Into<SocketId>) -> Self {
        Self {
            id: id.into(),
            handshake: BTreeMap::new(),
        }
    }

    /// Record a handshake header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.handshake.insert(name.into(), value.into());
        self
    }
}

/// Rooms of live sockets with emit primitives.
#[async_trait]
pub trait Fanout: Send + Sync {
    /// Add a local socket to a room. Joining twice is a no-op.
    fn join(&self, socket: &str, channel: &str);

    /// Remove a local socket from a room. Leaving a room not joined is a no-op.
    fn leave(&self, socket: &str, channel: &str);

    /// Rooms a local socket occupies.
    fn rooms(&self, socket: &str) -> Vec<String>;

    /// Whether a local socket is in a room.
    fn in_room(&self, socket: &str, channel: &str) -> bool;

    /// Every live socket in a room, across all instances.
    async fn sockets_in(&self, channel: &str) -> Result<HashSet<SocketId>, FanoutError>;

    /// Emit to every socket in a room, optionally skipping one socket.
    async fn emit_to_room(&self, channel: &str, frame: ServerFrame, except: Option<&str>);

    /// Emit to one socket.
    async fn emit_to_socket(&self, socket: &str, frame: ServerFrame);
}
