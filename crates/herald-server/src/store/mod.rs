//! Membership store backends.
//!
//! The in-memory store lives in `herald-core`. This module adds the
//! persistent backends and picks one from configuration.

mod redis;
mod sqlite;

pub use self::redis::{RedisStore, PRESENCE_UPDATED_CHANNEL};
pub use self::sqlite::SqliteStore;

use crate::config::DatabaseConfig;
use herald_core::{MembershipStore, MemoryStore, UnconfiguredStore};
use std::sync::Arc;
use tracing::{error, info};

/// Build the configured membership store.
///
/// A store that cannot be opened is reported and replaced by one that
/// refuses every operation, so presence degrades to "no members" instead of
/// stopping the server.
pub async fn build_store(config: &DatabaseConfig) -> Arc<dyn MembershipStore> {
    let store: Result<Arc<dyn MembershipStore>, String> = match config.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => SqliteStore::open(&config.sqlite.path)
            .await
            .map(|store| Arc::new(store) as Arc<dyn MembershipStore>)
            .map_err(|e| format!("Failed to open SQLite store: {e}")),
        "redis" => RedisStore::connect(&config.redis)
            .await
            .map(|store| Arc::new(store) as Arc<dyn MembershipStore>)
            .map_err(|e| format!("Failed to connect Redis store: {e}")),
        other => Err(format!("Database driver not set: {other:?}")),
    };

    match store {
        Ok(store) => {
            info!(driver = store.name(), "Membership store ready");
            store
        }
        Err(reason) => {
            error!(driver = %config.driver, "{reason}");
            Arc::new(UnconfiguredStore::new(reason))
        }
    }
}
