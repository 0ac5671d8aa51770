//! Two-tier cache front.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::local::LocalTier;
use crate::remote::RemoteTier;

/// Hybrid cache: Redis tier first, process-local tier behind it.
///
/// Reads check the remote tier, then the local tier, then report a miss;
/// the caller loads from the store and calls [`put`](Self::put) to
/// populate both tiers. Every remote-tier failure is caught and logged,
/// and the call degrades to local-only behavior for that request.
/// Nothing in here may turn a cache outage into a user-facing error.
#[derive(Clone)]
pub struct HybridCache {
    remote: Option<RemoteTier>,
    local: LocalTier,
    ttl: Duration,
}

impl HybridCache {
    /// Creates a cache with no remote tier.
    pub fn local_only(ttl: Duration) -> Self {
        Self {
            remote: None,
            local: LocalTier::new(),
            ttl,
        }
    }

    /// Creates a cache over an already-connected remote tier.
    pub fn with_remote(remote: RemoteTier, ttl: Duration) -> Self {
        Self {
            remote: Some(remote),
            local: LocalTier::new(),
            ttl,
        }
    }

    /// Connects to Redis, degrading to local-only if the connection
    /// cannot be established.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Self {
        match RemoteTier::connect(redis_url).await {
            Ok(remote) => Self::with_remote(remote, ttl),
            Err(error) => {
                tracing::warn!(%error, "remote cache unavailable, running local-only");
                metrics::counter!("cache_degraded_total").increment(1);
                Self::local_only(ttl)
            }
        }
    }

    /// Returns true if a remote tier is configured.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Looks up a key, checking the remote tier first.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(value)) => match serde_json::from_value(value) {
                    Ok(decoded) => {
                        metrics::counter!("cache_hits_total", "tier" => "remote").increment(1);
                        return Some(decoded);
                    }
                    Err(error) => {
                        tracing::warn!(key, %error, "discarding undecodable remote cache entry");
                        let _ = remote.invalidate(key).await;
                    }
                },
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(key, %error, "remote cache read failed, falling back to local");
                    metrics::counter!("cache_degraded_total").increment(1);
                }
            }
        }

        if let Some(value) = self.local.get(key).await {
            match serde_json::from_value(value) {
                Ok(decoded) => {
                    metrics::counter!("cache_hits_total", "tier" => "local").increment(1);
                    return Some(decoded);
                }
                Err(error) => {
                    tracing::warn!(key, %error, "discarding undecodable local cache entry");
                    self.local.invalidate(key).await;
                }
            }
        }

        metrics::counter!("cache_misses_total").increment(1);
        None
    }

    /// Populates both tiers.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key, %error, "failed to serialize value for cache");
                return;
            }
        };

        if let Some(remote) = &self.remote
            && let Err(error) = remote.put(key, &value, self.ttl).await
        {
            tracing::warn!(key, %error, "remote cache write failed");
            metrics::counter!("cache_degraded_total").increment(1);
        }

        self.local.put(key, value, self.ttl).await;
    }

    /// Removes a key from both tiers.
    pub async fn invalidate(&self, key: &str) {
        if let Some(remote) = &self.remote
            && let Err(error) = remote.invalidate(key).await
        {
            tracing::warn!(key, %error, "remote cache invalidation failed");
            metrics::counter!("cache_degraded_total").increment(1);
        }

        self.local.invalidate(key).await;
    }

    /// Removes every key starting with `prefix` from both tiers.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        if let Some(remote) = &self.remote
            && let Err(error) = remote.invalidate_prefix(prefix).await
        {
            tracing::warn!(prefix, %error, "remote cache prefix invalidation failed");
            metrics::counter!("cache_degraded_total").increment(1);
        }

        self.local.invalidate_prefix(prefix).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Listing {
        unit: String,
        remaining: i32,
    }

    fn listing() -> Listing {
        Listing {
            unit: "u-1".to_string(),
            remaining: 4,
        }
    }

    #[tokio::test]
    async fn local_only_roundtrip() {
        let cache = HybridCache::local_only(Duration::from_secs(60));
        assert!(!cache.has_remote());

        assert_eq!(cache.get::<Listing>("unit:u-1").await, None);

        cache.put("unit:u-1", &listing()).await;
        assert_eq!(cache.get::<Listing>("unit:u-1").await, Some(listing()));
    }

    #[tokio::test]
    async fn invalidate_hides_entry() {
        let cache = HybridCache::local_only(Duration::from_secs(60));
        cache.put("unit:u-1", &listing()).await;

        cache.invalidate("unit:u-1").await;
        assert_eq!(cache.get::<Listing>("unit:u-1").await, None);
    }

    #[tokio::test]
    async fn prefix_invalidation_spares_other_namespaces() {
        let cache = HybridCache::local_only(Duration::from_secs(60));
        cache.put("listing:any:false", &listing()).await;
        cache.put("unit:u-1", &listing()).await;

        cache.invalidate_prefix("listing:").await;

        assert_eq!(cache.get::<Listing>("listing:any:false").await, None);
        assert_eq!(cache.get::<Listing>("unit:u-1").await, Some(listing()));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = HybridCache::local_only(Duration::from_millis(20));
        cache.put("unit:u-1", &listing()).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get::<Listing>("unit:u-1").await, None);
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_miss() {
        let cache = HybridCache::local_only(Duration::from_secs(60));
        cache.put("unit:u-1", &serde_json::json!("not a listing")).await;

        assert_eq!(cache.get::<Listing>("unit:u-1").await, None);
    }

    #[tokio::test]
    async fn unreachable_redis_degrades_to_local_only() {
        // Nothing listens on this port; construction must not fail.
        let cache =
            HybridCache::connect("redis://127.0.0.1:1/", Duration::from_secs(60)).await;
        assert!(!cache.has_remote());

        cache.put("unit:u-1", &listing()).await;
        assert_eq!(cache.get::<Listing>("unit:u-1").await, Some(listing()));
    }
}
