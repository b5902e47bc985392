use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use domain::services::{DurableQueue, LoggingNotificationDispatcher, StateStore, SystemClock};
use geoattend_agent::app::create_app;
use geoattend_agent::config::Config;
use geoattend_agent::jobs::{
    CatalogRefreshJob, JobScheduler, LocationPollJob, PoolMetricsJob, SyncJob,
};
use geoattend_agent::middleware::{init_metrics, logging::init_logging};
use geoattend_agent::services::{
    AttendanceMonitor, Connectivity, HttpRemoteAuthority, LastKnownLocation, MonitorDeps,
    MonitorSettings, SyncWorker,
};
use persistence::repositories::StateRepository;

const JOB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting GeoAttend agent v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Prometheus recorder not installed, metrics disabled");
    }

    // Create database pool
    let pool = persistence::db::create_pool(&config.database_config()).await?;

    // Run migrations
    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    // Durable state
    let store: Arc<dyn StateStore> = Arc::new(StateRepository::new(pool.clone()));
    let queue = Arc::new(DurableQueue::open(Arc::clone(&store), config.queue.capacity).await);

    // Collaborators
    let remote = Arc::new(HttpRemoteAuthority::new(&config.remote)?);
    let clock = Arc::new(SystemClock);
    let location = Arc::new(LastKnownLocation::new(
        clock.clone(),
        chrono::Duration::seconds(config.monitoring.location_max_age_secs as i64),
    ));
    let connectivity = Arc::new(Connectivity::default());

    let monitor = Arc::new(AttendanceMonitor::new(
        MonitorSettings::from_config(&config)?,
        MonitorDeps {
            remote: remote.clone(),
            store,
            notifier: Arc::new(LoggingNotificationDispatcher),
            location,
            clock,
        },
        Arc::clone(&queue),
        Arc::clone(&connectivity),
    ));
    let sync = Arc::new(SyncWorker::new(
        queue,
        remote,
        connectivity,
        config.sync.batch_size,
        config.queue.retain_synced,
    ));

    monitor.start().await?;

    // Background jobs
    let mut scheduler = JobScheduler::new(CancellationToken::new());
    scheduler.register(LocationPollJob::new(
        Arc::clone(&monitor),
        config.monitoring.poll_interval_secs,
    ));
    scheduler.register(CatalogRefreshJob::new(
        Arc::clone(&monitor),
        config.monitoring.catalog_refresh_secs,
    ));
    scheduler.register(SyncJob::new(
        Arc::clone(&sync),
        monitor.sync_trigger(),
        config.sync.interval_secs,
    ));
    scheduler.register(PoolMetricsJob::new(pool.clone()));
    scheduler.start();

    // Build application
    let addr = config.socket_addr()?;
    let app = create_app(config, pool, Arc::clone(&monitor), sync);

    // Start server
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    scheduler.shutdown();
    scheduler.wait_for_shutdown(JOB_SHUTDOWN_TIMEOUT).await;
    monitor.stop().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
