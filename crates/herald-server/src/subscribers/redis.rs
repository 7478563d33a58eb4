//! Redis pub/sub ingestion.
//!
//! Producers publish `{event, data, socket}` JSON on `<prefix><channel>`.
//! Every message matching `<prefix>*` is broadcast to `<channel>`, except
//! traffic Herald publishes itself: cluster relay frames and member list
//! updates.

use crate::config::RedisConfig;
use crate::metrics;
use crate::store::PRESENCE_UPDATED_CHANNEL;
use futures_util::StreamExt;
use herald_core::{Dispatcher, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Decode a published payload into the target channel and message.
///
/// Returns `None` for payloads that are not a JSON message.
pub fn parse_payload(prefix: &str, channel: &str, payload: &str) -> Option<(String, Message)> {
    let message: Message = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(e) => {
            debug!(channel = %channel, error = %e, "No JSON message");
            return None;
        }
    };
    let channel = channel.strip_prefix(prefix).unwrap_or(channel);
    Some((channel.to_string(), message))
}

/// Whether a Redis channel carries Herald's own traffic rather than
/// producer events. `relay_prefix` is the cluster relay's prefix when the
/// relay is enabled.
pub fn is_internal_channel(channel: &str, relay_prefix: Option<&str>) -> bool {
    channel == PRESENCE_UPDATED_CHANNEL
        || relay_prefix.is_some_and(|prefix| {
            channel
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('#'))
        })
}

/// Start listening in the background. The task reconnects until aborted.
pub fn spawn(
    config: RedisConfig,
    relay_prefix: Option<String>,
    dispatcher: Arc<Dispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listen(&config, relay_prefix.as_deref(), &dispatcher).await {
                Ok(()) => warn!("Redis subscription closed"),
                Err(e) => {
                    error!(error = %e, "Redis subscriber failed");
                    metrics::record_error("redis_subscriber");
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}

async fn listen(
    config: &RedisConfig,
    relay_prefix: Option<&str>,
    dispatcher: &Dispatcher,
) -> redis::RedisResult<()> {
    let client = redis::Client::open(config.url.as_str())?;
    let mut pubsub = client.get_async_pubsub().await?;
    let pattern = format!("{}*", config.key_prefix);
    pubsub.psubscribe(&pattern).await?;
    info!(pattern = %pattern, "Listening for redis events");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        if is_internal_channel(msg.get_channel_name(), relay_prefix) {
            continue;
        }

        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Dropping non-text redis payload");
                continue;
            }
        };

        if let Some((channel, message)) =
            parse_payload(&config.key_prefix, msg.get_channel_name(), &payload)
        {
            debug!(channel = %channel, event = %message.event, "Received redis event");
            metrics::record_ingested("redis");
            dispatcher.broadcast(&channel, &message).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payload_strips_prefix() {
        let (channel, message) = parse_payload(
            "laravel_database_",
            "laravel_database_private-orders",
            r#"{"event":"OrderShipped","data":{"id":7},"socket":"s1"}"#,
        )
        .unwrap();

        assert_eq!(channel, "private-orders");
        assert_eq!(message.event, "OrderShipped");
        assert_eq!(message.data, json!({"id": 7}));
        assert_eq!(message.socket_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_parse_payload_without_prefix() {
        let (channel, message) =
            parse_payload("", "news", r#"{"event":"e","data":null,"socket":null}"#).unwrap();
        assert_eq!(channel, "news");
        assert!(message.socket_id.is_none());
    }

    #[test]
    fn test_parse_payload_drops_invalid_json() {
        assert!(parse_payload("", "news", "plain text").is_none());
        assert!(parse_payload("", "news", r#"{"data":1}"#).is_none());
    }

    #[test]
    fn test_internal_channels_skipped() {
        assert!(is_internal_channel("PresenceChannelUpdated", None));
        assert!(is_internal_channel("herald#broadcast", Some("herald")));
        assert!(is_internal_channel("herald#response#node-1", Some("herald")));

        // Without the relay, or outside its namespace, channels are events
        assert!(!is_internal_channel("herald#broadcast", None));
        assert!(!is_internal_channel("herald-news", Some("herald")));
        assert!(!is_internal_channel("private-orders", Some("herald")));
    }
}
