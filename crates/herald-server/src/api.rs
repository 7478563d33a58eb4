//! HTTP statistics API and the application key guard.
//!
//! Every `/apps/:appId/...` route requires the key of a configured client,
//! given as `Authorization: Bearer <key>` or `?auth_key=<key>`.

use crate::app::SharedState;
use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use herald_core::Member;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Read-only statistics routes, relative to the server root.
pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/apps/:appId/status", get(status))
        .route("/apps/:appId/channels", get(channels))
        .route("/apps/:appId/channels/:channel", get(channel))
        .route("/apps/:appId/channels/:channel/users", get(channel_users))
}

/// Liveness probe.
pub async fn root() -> &'static str {
    "OK"
}

/// Key carried by a request, from the bearer header or the query string.
fn request_key(request: &Request) -> Option<String> {
    if let Some(header) = request.headers().get(AUTHORIZATION) {
        let header = header.to_str().ok()?;
        return Some(header.strip_prefix("Bearer ").unwrap_or(header).to_string());
    }

    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut query)| query.remove("auth_key"))
}

/// Reject requests without the key of the application in the path.
pub async fn require_app_key(
    State(state): State<SharedState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let allowed = match (params.get("appId"), request_key(&request)) {
        (Some(app_id), Some(key)) if !key.is_empty() => {
            state.config.client_key(app_id) == Some(key.as_str())
        }
        _ => false,
    };

    if !allowed {
        debug!(path = %request.uri().path(), "Rejecting request without a valid app key");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn status(State(state): State<SharedState>) -> Json<Value> {
    let stats = state.hub.stats();
    Json(json!({
        "subscription_count": stats.connection_count,
        "uptime": state.uptime().as_secs_f64(),
    }))
}

#[derive(Debug, Deserialize)]
struct ChannelsQuery {
    filter_by_prefix: Option<String>,
}

async fn channels(
    State(state): State<SharedState>,
    Query(query): Query<ChannelsQuery>,
) -> Json<Value> {
    let prefix = query.filter_by_prefix.unwrap_or_default();
    let mut rooms = state.hub.room_sizes();
    rooms.sort();

    let channels: Map<String, Value> = rooms
        .into_iter()
        .filter(|(name, _)| name.starts_with(&prefix))
        .map(|(name, count)| {
            (
                name,
                json!({ "subscription_count": count, "occupied": true }),
            )
        })
        .collect();

    Json(json!({ "channels": channels }))
}

/// First record of each user, in stored order.
fn unique_users(members: Vec<Member>) -> Vec<Member> {
    let mut unique: Vec<Member> = Vec::with_capacity(members.len());
    for member in members {
        if !unique.iter().any(|seen| seen.same_user(&member)) {
            unique.push(member);
        }
    }
    unique
}

async fn channel(
    State(state): State<SharedState>,
    Path((_app_id, channel)): Path<(String, String)>,
) -> Json<Value> {
    let count = state.hub.room_size(&channel);
    let mut result = json!({
        "subscription_count": count,
        "occupied": count > 0,
    });

    if state.channels.is_presence(&channel) {
        let members = state.channels.presence().get_members(&channel).await;
        result["user_count"] = json!(unique_users(members).len());
    }

    Json(result)
}

async fn channel_users(
    State(state): State<SharedState>,
    Path((_app_id, channel)): Path<(String, String)>,
) -> Response {
    if !state.channels.is_presence(&channel) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "User list is only possible for Presence Channels" })),
        )
            .into_response();
    }

    let members = state.channels.presence().get_members(&channel).await;
    let users: Vec<Value> = unique_users(members)
        .into_iter()
        .map(|member| json!({ "id": member.user_id, "user_info": member.user_info }))
        .collect();

    Json(json!({ "users": users })).into_response()
}
