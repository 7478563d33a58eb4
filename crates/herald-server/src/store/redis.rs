//! Redis membership store, shared by every instance.

use crate::config::RedisConfig;
use async_trait::async_trait;
use herald_core::{MembershipStore, StoreError};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Channel that receives member list updates when publishing is enabled.
pub const PRESENCE_UPDATED_CHANNEL: &str = "PresenceChannelUpdated";

/// Stores JSON-encoded values under prefixed Redis keys.
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    publish_presence: bool,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or Redis is unreachable.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str()).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;
        info!(prefix = %config.key_prefix, "Connected Redis membership store");
        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            publish_presence: config.publish_presence,
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Whether a key holds a presence channel's member list.
pub fn is_presence_members_key(key: &str) -> bool {
    key.starts_with("presence-") && key.ends_with(":members")
}

/// Notification published when a presence member list changes.
pub fn presence_update_notice(key: &str, members: &Value) -> Value {
    json!({
        "event": {
            "channel": key,
            "members": members,
        }
    })
}

#[async_trait]
impl MembershipStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.prefixed_key(key)).await.map_err(backend)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&value)?;
        conn.set::<_, _, ()>(self.prefixed_key(key), encoded)
            .await
            .map_err(backend)?;

        if self.publish_presence && is_presence_members_key(key) {
            let notice = presence_update_notice(key, &value).to_string();
            let receivers: i64 = conn
                .publish(PRESENCE_UPDATED_CHANNEL, notice)
                .await
                .map_err(backend)?;
            debug!(key = %key, receivers, "Published presence update");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
