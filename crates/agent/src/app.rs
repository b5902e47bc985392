use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware};
use crate::routes::{attendance, health, locations, status, sync};
use crate::services::{AttendanceMonitor, SyncWorker};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub monitor: Arc<AttendanceMonitor>,
    pub sync: Arc<SyncWorker>,
}

pub fn create_app(
    config: Config,
    pool: SqlitePool,
    monitor: Arc<AttendanceMonitor>,
    sync: Arc<SyncWorker>,
) -> Router {
    let config = Arc::new(config);
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    let state = AppState {
        pool,
        config,
        monitor,
        sync,
    };

    let api_routes = Router::new()
        .route("/api/v1/status", get(status::get_status))
        .route("/api/v1/locations", post(locations::push_location))
        .route("/api/v1/locations/batch", post(locations::push_batch))
        .route("/api/v1/location-permission", post(locations::set_permission))
        .route("/api/v1/attendance/today", get(attendance::get_today))
        .route("/api/v1/attendance/check-in", post(attendance::check_in))
        .route("/api/v1/attendance/check-out", post(attendance::check_out))
        .route("/api/v1/sync", post(sync::sync_now))
        .route("/api/v1/queue", get(sync::queue_stats));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
