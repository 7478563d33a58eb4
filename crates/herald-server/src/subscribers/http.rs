//! HTTP event ingestion: `POST /apps/:appId/events`.

use crate::app::SharedState;
use crate::metrics;
use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use herald_core::Message;
use serde_json::{json, Value};
use tracing::debug;

const INCOMPLETE_EVENT: &str = "Event must include channel, event name and data";

/// Truthiness as producers' JSON clients understand it.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn a request body into target channels and the message to dispatch.
///
/// `channels` wins over `channel`. String `data` is decoded as JSON when it
/// parses and relayed as the string otherwise.
///
/// # Errors
///
/// Returns the client-facing error when the channel, event name or data is
/// missing.
pub fn normalize(body: &Value) -> Result<(Vec<String>, Message), &'static str> {
    let field = |name: &str| body.get(name).filter(|v| is_truthy(v));

    let target = field("channels").or_else(|| field("channel"));
    let (Some(target), Some(name), Some(data)) = (target, field("name"), field("data")) else {
        return Err(INCOMPLETE_EVENT);
    };

    let channels = match target {
        Value::Array(items) => items.iter().map(as_text).collect(),
        single => vec![as_text(single)],
    };

    let data = match data {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| data.clone()),
        other => other.clone(),
    };

    let mut message = Message::new(as_text(name), data);
    if let Some(Value::String(socket)) = body.get("socket_id") {
        message = message.with_socket(socket.as_str());
    }
    Ok((channels, message))
}

fn bad_request(message: &str) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Accept an event from a producer and broadcast it.
pub async fn publish_event(State(state): State<SharedState>, body: Bytes) -> impl IntoResponse {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "Rejecting event with invalid JSON body");
            return bad_request(INCOMPLETE_EVENT);
        }
    };

    let (channels, message) = match normalize(&body) {
        Ok(normalized) => normalized,
        Err(reason) => return bad_request(reason),
    };

    debug!(channels = ?channels, event = %message.event, "Received HTTP event");
    metrics::record_ingested("http");
    state.dispatcher.broadcast_to(&channels, &message).await;

    Json(json!({ "message": "ok" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_single_channel() {
        let (channels, message) = normalize(&json!({
            "channel": "orders",
            "name": "OrderShipped",
            "data": "{\"text\":\"hi\"}",
            "socket_id": "s1"
        }))
        .unwrap();

        assert_eq!(channels, vec!["orders".to_string()]);
        assert_eq!(message.event, "OrderShipped");
        assert_eq!(message.data, json!({"text": "hi"}));
        assert_eq!(message.socket_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_normalize_channel_list_and_plain_string() {
        let (channels, message) = normalize(&json!({
            "channels": ["a", "b"],
            "channel": "ignored",
            "name": "tick",
            "data": "not json"
        }))
        .unwrap();

        assert_eq!(channels, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(message.data, json!("not json"));
        assert!(message.socket_id.is_none());
    }

    #[test]
    fn test_normalize_rejects_incomplete_events() {
        for body in [
            json!({"name": "e", "data": {}}),
            json!({"channel": "a", "data": {}}),
            json!({"channel": "a", "name": "e"}),
            json!({"channel": "", "name": "e", "data": {}}),
            json!({"channel": "a", "name": "e", "data": 0}),
            json!({"channel": "a", "name": "e", "data": ""}),
        ] {
            assert_eq!(normalize(&body).unwrap_err(), INCOMPLETE_EVENT, "{body}");
        }
    }
}
