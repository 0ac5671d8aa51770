//! Cache tier error types.

use thiserror::Error;

/// Errors raised by individual cache tiers.
///
/// These never cross the cache boundary: the hybrid layer catches and
/// logs them, degrading to the next tier or a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The Redis tier failed (network, auth, unavailable).
    #[error("Remote cache error: {0}")]
    Remote(#[from] redis::RedisError),

    /// A cached value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache tier operations.
pub type Result<T> = std::result::Result<T, CacheError>;
