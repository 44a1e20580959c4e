//! Pin reporting daemon - averages pin telemetry and persists it per granularity

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pin_reporting::aggregator::Aggregator;
use pin_reporting::config::{self, Config};
use pin_reporting::coordinator::PersistenceCoordinator;
use pin_reporting::db::Database;
use pin_reporting::offload::OffloadPool;
use pin_reporting::routes::{self, metrics::Metrics};
use pin_reporting::state::AppState;
use pin_reporting::store::ReportingStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; LOG_FORMAT=json switches to structured JSON lines
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pin_reporting=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config::json_logs(|key| std::env::var(key).ok()) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = Config::from_env()?;

    // Connect to database
    let db = match Database::new(&config.database_url, config.db_max_connections).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };
    let store: Arc<dyn ReportingStore> = Arc::new(db);

    let aggregator = Arc::new(Aggregator::new());
    let metrics = Arc::new(Metrics::new());
    let offload = Arc::new(OffloadPool::new(
        config.offload_workers,
        config.offload_queue_capacity,
    ));

    let coordinator = Arc::new(PersistenceCoordinator::new(
        Arc::clone(&aggregator),
        Arc::clone(&store),
        Arc::clone(&offload),
        Arc::clone(&metrics),
        config.clone(),
    ));
    coordinator.start();

    let state = AppState::new(store, aggregator, offload, metrics);
    let app = routes::router(state);

    info!("pin-reporting v{} starting on {}", env!("CARGO_PKG_VERSION"), config.listen_addr);
    info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
    info!(
        grace_ms = config.flush_grace.as_millis() as u64,
        "Flushing closed buckets per granularity"
    );
    info!(
        workers = config.offload_workers,
        queue_capacity = config.offload_queue_capacity,
        "Offload pool configured"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, flushing reporting data");
    coordinator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
