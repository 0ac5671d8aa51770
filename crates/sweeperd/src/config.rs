//! Daemon configuration loaded from environment variables.

use std::time::Duration;

/// Sweeper daemon configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — PostgreSQL connection string
///   (default: `"postgres://localhost:5432/postgres"`)
/// - `REDIS_URL` — remote cache tier; unset runs local-only
/// - `DB_MAX_CONNECTIONS` — pool size (default: `5`)
/// - `DB_ACQUIRE_TIMEOUT_SECS` — pool wait budget (default: `5`)
/// - `METRICS_PORT` — Prometheus exporter port (default: `9100`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
///
/// Sweep cadence, lease, and batch size come from [`engine::EngineConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub metrics_port: u16,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/postgres".to_string()),
            redis_url: std::env::var("REDIS_URL").ok(),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            db_acquire_timeout: std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(5)),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9100),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/postgres".to_string(),
            redis_url: None,
            db_max_connections: 5,
            db_acquire_timeout: Duration::from_secs(5),
            metrics_port: 9100,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.database_url, "postgres://localhost:5432/postgres");
        assert_eq!(config.redis_url, None);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.db_acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.log_level, "info");
    }
}
