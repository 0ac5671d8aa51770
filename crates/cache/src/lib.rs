//! Best-effort hybrid read cache.
//!
//! Two tiers: a shared Redis tier consulted first, and a process-local
//! tier that serves when Redis misses or is unreachable. The cache is a
//! latency optimization only. It is never consulted for correctness-
//! critical decisions, and a failing remote tier degrades silently to
//! local-only behavior instead of surfacing an error.

pub mod error;
pub mod hybrid;
pub mod local;
pub mod remote;

pub use error::{CacheError, Result};
pub use hybrid::HybridCache;
pub use local::LocalTier;
pub use remote::RemoteTier;
