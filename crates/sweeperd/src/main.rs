//! Expiry sweeper daemon entry point.

mod config;

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cache::HybridCache;
use common::SystemClock;
use config::Config;
use engine::{EngineConfig, ExpirySweeper, NoopNotifier, ReservationService};
use store::PostgresInventoryStore;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics exporter
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .expect("failed to install Prometheus exporter");

    // 3. Connect the store with a bounded pool
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    let store = PostgresInventoryStore::new(pool);
    store.run_migrations().await.expect("migrations failed");

    // 4. Cache: remote tier when configured, local-only otherwise
    let engine_config = EngineConfig::from_env();
    let cache = match &config.redis_url {
        Some(url) => HybridCache::connect(url, engine_config.cache_ttl).await,
        None => HybridCache::local_only(engine_config.cache_ttl),
    };

    // 5. Wire the sweeper. Notification delivery belongs to front-end
    // collaborators, so the daemon runs without a dispatcher.
    let sweep_interval = engine_config.sweep_interval;
    let service = ReservationService::new(
        store,
        cache,
        Arc::new(NoopNotifier),
        SystemClock,
        engine_config,
    );
    let sweeper = ExpirySweeper::new(service);

    tracing::info!(
        interval_secs = sweep_interval.as_secs(),
        metrics_port = config.metrics_port,
        "sweeper starting"
    );

    // 6. Run until a shutdown signal arrives
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    sweeper.run(shutdown_rx).await;

    tracing::info!("sweeper shut down gracefully");
}
