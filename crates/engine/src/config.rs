//! Engine configuration loaded from environment variables.

use chrono::Duration;

/// Tunables for the reservation engine, with production defaults.
///
/// Reads from environment variables:
/// - `RESERVATION_HOLD_SECS` — how long a pending hold lasts (default: 2 h)
/// - `IDEMPOTENCY_TTL_SECS` — idempotency record lifetime (default: 24 h)
/// - `CACHE_TTL_SECS` — cache entry lifetime (default: 60 s)
/// - `SWEEP_INTERVAL_SECS` — sweeper cadence (default: 60 s)
/// - `SWEEP_CLAIM_LEASE_SECS` — sweeper claim lease (default: 5 min)
/// - `SWEEP_BATCH_LIMIT` — max reservations claimed per pass (default: 100)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hold_ttl: Duration,
    pub idempotency_ttl: Duration,
    pub cache_ttl: std::time::Duration,
    pub sweep_interval: std::time::Duration,
    pub claim_lease: Duration,
    pub sweep_batch_limit: i64,
}

fn env_secs(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hold_ttl: env_secs("RESERVATION_HOLD_SECS")
                .map(Duration::seconds)
                .unwrap_or(defaults.hold_ttl),
            idempotency_ttl: env_secs("IDEMPOTENCY_TTL_SECS")
                .map(Duration::seconds)
                .unwrap_or(defaults.idempotency_ttl),
            cache_ttl: env_secs("CACHE_TTL_SECS")
                .map(|s| std::time::Duration::from_secs(s.max(1) as u64))
                .unwrap_or(defaults.cache_ttl),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS")
                .map(|s| std::time::Duration::from_secs(s.max(1) as u64))
                .unwrap_or(defaults.sweep_interval),
            claim_lease: env_secs("SWEEP_CLAIM_LEASE_SECS")
                .map(Duration::seconds)
                .unwrap_or(defaults.claim_lease),
            sweep_batch_limit: env_secs("SWEEP_BATCH_LIMIT")
                .unwrap_or(defaults.sweep_batch_limit),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::hours(2),
            idempotency_ttl: Duration::hours(24),
            cache_ttl: std::time::Duration::from_secs(60),
            sweep_interval: std::time::Duration::from_secs(60),
            claim_lease: Duration::minutes(5),
            sweep_batch_limit: 100,
        }
    }
}
