//! Process-local cache tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// In-process cache tier.
///
/// Private to one replica; other replicas never see its contents. Expired
/// entries are evicted lazily on read and swept opportunistically on write.
#[derive(Clone, Default)]
pub struct LocalTier {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl LocalTier {
    /// Creates a new empty local tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a live entry.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but has expired; evict it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key)
            && entry.expires_at <= Instant::now()
        {
            entries.remove(key);
        }
        None
    }

    /// Stores a value with a TTL, sweeping any other expired entries.
    pub async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Removes a single key.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Removes every key starting with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.entries
            .write()
            .await
            .retain(|k, _| !k.starts_with(prefix));
    }

    /// Number of entries currently held (including not-yet-evicted
    /// expired ones).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if the tier holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
