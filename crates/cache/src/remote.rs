//! Shared Redis cache tier.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::error::Result;

/// Redis-backed cache tier shared across replicas.
///
/// Values are stored as JSON strings under their namespaced keys with a
/// server-side TTL, so entries vanish without any sweeping on our side.
#[derive(Clone)]
pub struct RemoteTier {
    conn_manager: ConnectionManager,
}

impl RemoteTier {
    /// Connects to Redis.
    ///
    /// `redis_url` is a connection URL such as `redis://127.0.0.1:6379`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self { conn_manager })
    }

    /// Looks up a key.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stores a value with a TTL.
    pub async fn put(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let payload = serde_json::to_string(value)?;
        let ttl_seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, payload, ttl_seconds).await?;
        Ok(())
    }

    /// Removes a single key.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Removes every key starting with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{prefix}*");

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(())
    }
}
