//! Redis relay between instances.
//!
//! [`ClusterFanout`] wraps the local hub. Room emits are delivered locally
//! and published for the other instances, which deliver them to their own
//! sockets. Live room membership is the union of every instance's local
//! sockets, collected with a request/response round over pub/sub.
//!
//! Relay messages are MessagePack frames:
//!
//! ```text
//! <prefix>#broadcast          Broadcast { node, channel, frame, except }
//! <prefix>#request            SocketsRequest { node, request, channel }
//! <prefix>#response#<node>    SocketsResponse { request, sockets }
//! ```

use crate::config::AdapterConfig;
use crate::metrics;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use herald_core::{Fanout, FanoutError, LocalFanout, SocketId};
use herald_protocol::{codec, ServerFrame};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Messages exchanged between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// Deliver a frame to a room on every other instance.
    Broadcast {
        node: String,
        channel: String,
        frame: ServerFrame,
        except: Option<String>,
    },
    /// Ask every other instance for its local sockets in a room.
    SocketsRequest {
        node: String,
        request: String,
        channel: String,
    },
    /// One instance's answer to a [`RelayMessage::SocketsRequest`].
    SocketsResponse {
        request: String,
        sockets: Vec<SocketId>,
    },
}

/// Pub/sub channel names of one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayChannels {
    pub broadcast: String,
    pub request: String,
    response_prefix: String,
}

impl RelayChannels {
    /// Channel names under a prefix.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            broadcast: format!("{prefix}#broadcast"),
            request: format!("{prefix}#request"),
            response_prefix: format!("{prefix}#response#"),
        }
    }

    /// Channel an instance receives its responses on.
    #[must_use]
    pub fn response(&self, node: &str) -> String {
        format!("{}{node}", self.response_prefix)
    }
}

/// A membership query waiting for answers.
struct PendingRequest {
    remaining: usize,
    sockets: HashSet<SocketId>,
    done: Option<oneshot::Sender<HashSet<SocketId>>>,
}

/// Membership queries in flight, by request id.
#[derive(Default)]
struct PendingRequests {
    requests: DashMap<String, PendingRequest>,
}

impl PendingRequests {
    /// Track a new query expecting `expected` answers.
    fn register(&self, expected: usize) -> (String, oneshot::Receiver<HashSet<SocketId>>) {
        let request = uuid::Uuid::new_v4().to_string();
        let (done, answers) = oneshot::channel();
        self.requests.insert(
            request.clone(),
            PendingRequest {
                remaining: expected,
                sockets: HashSet::new(),
                done: Some(done),
            },
        );
        (request, answers)
    }

    /// Add one instance's answer. The query resolves with the last one.
    fn collect(&self, request: &str, sockets: Vec<SocketId>) {
        let complete = match self.requests.get_mut(request) {
            Some(mut pending) => {
                pending.sockets.extend(sockets);
                pending.remaining = pending.remaining.saturating_sub(1);
                pending.remaining == 0
            }
            None => {
                trace!(request = %request, "Late membership response ignored");
                false
            }
        };

        if complete {
            if let Some((_, mut pending)) = self.requests.remove(request) {
                if let Some(done) = pending.done.take() {
                    let _ = done.send(std::mem::take(&mut pending.sockets));
                }
            }
        }
    }

    /// Stop tracking a query. Returns how many answers were still missing.
    fn expire(&self, request: &str) -> usize {
        self.requests
            .remove(request)
            .map(|(_, pending)| pending.remaining)
            .unwrap_or(0)
    }
}

/// The Redis-independent half of the relay: applies relay traffic from
/// other instances to this instance's hub.
struct RelayInbox {
    local: Arc<LocalFanout>,
    node: String,
    pending: PendingRequests,
}

impl RelayInbox {
    fn new(local: Arc<LocalFanout>, node: String) -> Self {
        Self {
            local,
            node,
            pending: PendingRequests::default(),
        }
    }

    /// Apply a relay message. Returns the instance to answer and the
    /// answer, when one is owed.
    fn receive(&self, message: RelayMessage) -> Option<(String, RelayMessage)> {
        match message {
            RelayMessage::Broadcast {
                node,
                channel,
                frame,
                except,
            } => {
                // Our own broadcasts were delivered locally before publishing
                if node != self.node {
                    self.local.deliver(&channel, frame, except.as_deref());
                }
                None
            }
            RelayMessage::SocketsRequest {
                node,
                request,
                channel,
            } => {
                if node == self.node {
                    return None;
                }
                let reply = RelayMessage::SocketsResponse {
                    request,
                    sockets: self.local.local_sockets_in(&channel).into_iter().collect(),
                };
                Some((node, reply))
            }
            RelayMessage::SocketsResponse { request, sockets } => {
                self.pending.collect(&request, sockets);
                None
            }
        }
    }

    /// Local sockets in a room merged with remote answers.
    fn merge(&self, channel: &str, remote: HashSet<SocketId>) -> HashSet<SocketId> {
        let mut sockets = self.local.local_sockets_in(channel);
        sockets.extend(remote);
        sockets
    }
}

/// Fan-out spanning every instance connected to the same Redis.
pub struct ClusterFanout {
    inbox: RelayInbox,
    channels: RelayChannels,
    client: redis::Client,
    publisher: ConnectionManager,
    request_timeout: Duration,
}

impl ClusterFanout {
    /// Connect the relay.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis is unreachable.
    pub async fn connect(
        local: Arc<LocalFanout>,
        config: &AdapterConfig,
    ) -> redis::RedisResult<Arc<Self>> {
        let client = redis::Client::open(config.url.as_str())?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        let node = uuid::Uuid::new_v4().to_string();
        info!(node = %node, prefix = %config.key_prefix, "Cluster relay connected");

        Ok(Arc::new(Self {
            inbox: RelayInbox::new(local, node),
            channels: RelayChannels::new(&config.key_prefix),
            client,
            publisher,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }))
    }

    /// Start receiving relay traffic. The task reconnects until aborted.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(e) = relay.listen().await {
                    error!(error = %e, "Cluster relay subscription failed");
                    metrics::record_error("cluster_relay");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    async fn listen(&self) -> redis::RedisResult<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channels.broadcast).await?;
        pubsub.subscribe(&self.channels.request).await?;
        pubsub.subscribe(self.channels.response(&self.inbox.node)).await?;
        debug!(node = %self.inbox.node, "Listening for relay traffic");

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            match codec::decode::<RelayMessage>(msg.get_payload_bytes()) {
                Ok(message) => self.handle(message).await,
                Err(e) => warn!(error = %e, "Dropping malformed relay message"),
            }
        }
        Ok(())
    }

    /// Apply a message received from another instance.
    pub async fn handle(&self, message: RelayMessage) {
        if let Some((node, reply)) = self.inbox.receive(message) {
            if let Err(e) = self.publish(&self.channels.response(&node), &reply).await {
                warn!(error = %e, "Failed to answer membership request");
            }
        }
    }

    async fn publish(&self, channel: &str, message: &RelayMessage) -> Result<(), FanoutError> {
        let payload = codec::encode(message).map_err(|e| FanoutError::Relay(e.to_string()))?;
        let mut conn = self.publisher.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(&payload[..])
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| FanoutError::Relay(e.to_string()))?;
        Ok(())
    }

    /// Number of other instances listening for membership requests.
    async fn peer_count(&self) -> Result<usize, FanoutError> {
        let mut conn = self.publisher.clone();
        let (_, subscribers): (String, usize) = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(&self.channels.request)
            .query_async(&mut conn)
            .await
            .map_err(|e| FanoutError::Relay(e.to_string()))?;
        Ok(subscribers.saturating_sub(1))
    }

    /// Wait for `expected` answers to `request`, or fail at the deadline.
    async fn await_responses(
        &self,
        request: &str,
        expected: usize,
        answers: oneshot::Receiver<HashSet<SocketId>>,
    ) -> Result<HashSet<SocketId>, FanoutError> {
        match tokio::time::timeout(self.request_timeout, answers).await {
            Ok(Ok(sockets)) => Ok(sockets),
            Ok(Err(_)) => Err(FanoutError::Relay("membership request dropped".to_string())),
            Err(_) => {
                let missing = self.inbox.pending.expire(request);
                Err(FanoutError::Timeout { expected, missing })
            }
        }
    }
}

#[async_trait]
impl Fanout for ClusterFanout {
    fn join(&self, socket: &str, channel: &str) {
        self.inbox.local.join(socket, channel);
    }

    fn leave(&self, socket: &str, channel: &str) {
        self.inbox.local.leave(socket, channel);
    }

    fn rooms(&self, socket: &str) -> Vec<String> {
        self.inbox.local.rooms(socket)
    }

    fn in_room(&self, socket: &str, channel: &str) -> bool {
        self.inbox.local.in_room(socket, channel)
    }

    async fn sockets_in(&self, channel: &str) -> Result<HashSet<SocketId>, FanoutError> {
        let expected = self.peer_count().await?;
        if expected == 0 {
            return Ok(self.inbox.local.local_sockets_in(channel));
        }

        let (request, answers) = self.inbox.pending.register(expected);
        let query = RelayMessage::SocketsRequest {
            node: self.inbox.node.clone(),
            request: request.clone(),
            channel: channel.to_string(),
        };
        if let Err(e) = self.publish(&self.channels.request, &query).await {
            self.inbox.pending.expire(&request);
            return Err(e);
        }

        let remote = self.await_responses(&request, expected, answers).await?;
        Ok(self.inbox.merge(channel, remote))
    }

    async fn emit_to_room(&self, channel: &str, frame: ServerFrame, except: Option<&str>) {
        let relayed = RelayMessage::Broadcast {
            node: self.inbox.node.clone(),
            channel: channel.to_string(),
            frame: frame.clone(),
            except: except.map(str::to_string),
        };
        self.inbox.local.deliver(channel, frame, except);
        if let Err(e) = self.publish(&self.channels.broadcast, &relayed).await {
            error!(channel = %channel, error = %e, "Failed to relay broadcast");
            metrics::record_error("cluster_relay");
        }
    }

    async fn emit_to_socket(&self, socket: &str, frame: ServerFrame) {
        self.inbox.local.emit_to_socket(socket, frame).await;
    }
}
