//! Socket handlers for the Herald server.
//!
//! Each WebSocket runs on its own task: frames from the client are decoded
//! and handed to the channel manager, and frames queued for the socket by the
//! hub are written back. Clients speaking JSON text get text frames; a client
//! that sends MessagePack binary frames is answered in binary from then on.

use crate::app::SharedState;
use crate::metrics::{self, ConnectionMetricsGuard};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::COOKIE, HeaderMap},
    response::IntoResponse,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use herald_core::{JoinOutcome, SocketInfo};
use herald_protocol::{codec, ClientFrame, ServerFrame};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Wire encoding negotiated with a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Json,
    MessagePack,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let mut socket = SocketInfo::new(uuid::Uuid::new_v4().to_string());
    if let Some(cookie) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        socket = socket.with_header("Cookie", cookie);
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |ws| handle_websocket(ws, socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(ws: WebSocket, socket: SocketInfo, state: SharedState) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let socket_id = socket.id.clone();
    let mut outbound = state.hub.register(socket_id.as_str());

    debug!(socket = %socket_id, "WebSocket connected");

    let (mut sender, mut receiver) = ws.split();
    let mut encoding = Encoding::Json;

    if send_frame(&mut sender, &ServerFrame::connected(&socket_id), encoding)
        .await
        .is_ok()
    {
        let heartbeat_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(state.config.heartbeat.interval_ms.max(1)));
        heartbeat.tick().await;
        let mut last_seen = Instant::now();

        // Read buffer for partial binary frames
        let mut read_buffer = BytesMut::with_capacity(4096);

        loop {
            tokio::select! {
                biased;

                Some(frame) = outbound.recv() => {
                    if send_frame(&mut sender, &frame, encoding).await.is_err() {
                        break;
                    }
                }

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > heartbeat_timeout {
                        debug!(socket = %socket_id, "Heartbeat timed out");
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }

                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            let start = Instant::now();
                            metrics::record_message(text.len(), "inbound");
                            match codec::decode_text::<ClientFrame>(&text) {
                                Ok(frame) => handle_frame(frame, &socket, &state).await,
                                Err(e) => trace!(socket = %socket_id, error = %e, "Dropping malformed frame"),
                            }
                            metrics::record_latency(start.elapsed().as_secs_f64());
                        }
                        Some(Ok(Message::Binary(data))) => {
                            last_seen = Instant::now();
                            let start = Instant::now();
                            encoding = Encoding::MessagePack;
                            metrics::record_message(data.len(), "inbound");
                            read_buffer.extend_from_slice(&data);

                            loop {
                                match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                                    Ok(Some(frame)) => handle_frame(frame, &socket, &state).await,
                                    Ok(None) => break,
                                    Err(e) => {
                                        trace!(socket = %socket_id, error = %e, "Dropping malformed frame");
                                        read_buffer.clear();
                                        break;
                                    }
                                }
                            }
                            metrics::record_latency(start.elapsed().as_secs_f64());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_seen = Instant::now();
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_seen = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) => {
                            debug!(socket = %socket_id, "Received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(socket = %socket_id, error = %e, "WebSocket error");
                            metrics::record_error("websocket");
                            break;
                        }
                        None => {
                            debug!(socket = %socket_id, "WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }
    } else {
        warn!(socket = %socket_id, "Failed to send connected frame");
    }

    // Disconnect is an implicit leave of every channel.
    let departures = state.channels.leave_all(&socket_id, "transport close").await;
    metrics::record_presence_leaves(departures);
    state.hub.unregister(&socket_id);
    metrics::set_active_channels(state.hub.stats().room_count);

    debug!(socket = %socket_id, "WebSocket disconnected");
}

/// Handle a decoded client frame.
async fn handle_frame(frame: ClientFrame, socket: &SocketInfo, state: &SharedState) {
    match frame {
        ClientFrame::Subscribe(subscription) => {
            debug!(socket = %socket.id, channel = %subscription.channel, "Subscribe request");
            match state.channels.join(socket, subscription).await {
                JoinOutcome::Joined { announced } => {
                    metrics::record_subscription();
                    if announced {
                        metrics::record_presence_join();
                    }
                }
                JoinOutcome::Rejected { status } => metrics::record_auth_failure(status),
                JoinOutcome::Ignored => {}
            }
            metrics::set_active_channels(state.hub.stats().room_count);
        }

        ClientFrame::Unsubscribe { channel } => {
            if state.channels.leave(&socket.id, &channel, "unsubscribed").await {
                metrics::record_presence_leaves(1);
            }
            metrics::set_active_channels(state.hub.stats().room_count);
        }

        ClientFrame::ClientEvent(payload) => {
            state.channels.client_event(&socket.id, payload).await;
        }

        ClientFrame::Ping => {
            state.hub.send_to(&socket.id, ServerFrame::pong());
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
    encoding: Encoding,
) -> anyhow::Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_text(frame)?),
        Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    };
    let size = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_message(size, "outbound");
    sender.send(message).await?;
    Ok(())
}
