//! Common test utilities for integration tests.
//!
//! Every harness runs against an in-memory SQLite database, so no external
//! services are needed.

// Not every integration test uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use domain::models::{GeofencePayload, LocationSample};
use domain::services::{
    Clock, DurableQueue, MockLocationProvider, MockNotificationDispatcher, MockRemoteAuthority,
    StateStore, SystemClock, EARTH_RADIUS_METERS,
};
use geoattend_agent::app::create_app;
use geoattend_agent::config::Config;
use geoattend_agent::services::{
    AttendanceMonitor, Connectivity, MonitorDeps, MonitorSettings, SyncWorker,
};
use persistence::db::{create_pool, run_migrations};
use persistence::repositories::StateRepository;

pub const TEST_USER: &str = "u-integration";

/// Test configuration built from embedded defaults.
pub fn test_config() -> Config {
    Config::load_for_test(&[
        ("monitoring.user_id", TEST_USER),
        ("remote.base_url", "http://127.0.0.1:9"),
        ("sync.batch_size", "2"),
        ("queue.capacity", "100"),
    ])
    .expect("Failed to build test config")
}

/// Create a migrated in-memory database.
pub async fn create_test_pool(config: &Config) -> SqlitePool {
    let pool = create_pool(&config.database_config())
        .await
        .expect("Failed to open test database");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// Office fence around (0, 0) with a 100 m radius.
pub fn office() -> GeofencePayload {
    serde_json::from_value(json!({
        "id": "office",
        "name": "Office",
        "center": { "latitude": 0.0, "longitude": 0.0 },
        "radiusMeters": 100.0,
        "workingHours": { "start": "09:00", "end": "18:00" },
        "alerts": { "onEntry": true, "onExit": true }
    }))
    .expect("Invalid geofence fixture")
}

/// A sample `meters_north` of the office center.
pub fn sample_north(meters_north: f64, time: DateTime<Utc>) -> LocationSample {
    let latitude = (meters_north / EARTH_RADIUS_METERS).to_degrees();
    LocationSample::new(latitude, 0.0, 5.0, time)
}

/// Everything an integration test needs to drive the agent.
pub struct TestAgent {
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<StateRepository>,
    pub queue: Arc<DurableQueue>,
    pub remote: Arc<MockRemoteAuthority>,
    pub notifier: Arc<MockNotificationDispatcher>,
    pub location: Arc<MockLocationProvider>,
    pub connectivity: Arc<Connectivity>,
    pub monitor: Arc<AttendanceMonitor>,
    pub sync: Arc<SyncWorker>,
}

impl TestAgent {
    /// Builds an agent on the system clock. The monitor is not started.
    pub async fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock)).await
    }

    pub async fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let config = test_config();
        let pool = create_test_pool(&config).await;
        Self::on_pool(config, pool, clock).await
    }

    /// Builds an agent over an existing database, e.g. to simulate a restart.
    pub async fn on_pool(config: Config, pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(StateRepository::new(pool.clone()));
        let queue = Arc::new(
            DurableQueue::open(store.clone() as Arc<dyn StateStore>, config.queue.capacity).await,
        );
        let remote = Arc::new(MockRemoteAuthority::with_geofences(vec![office()]));
        let notifier = Arc::new(MockNotificationDispatcher::new());
        let location = Arc::new(MockLocationProvider::new());
        let connectivity = Arc::new(Connectivity::default());

        let settings = MonitorSettings::from_config(&config).expect("Invalid monitor settings");
        let monitor = Arc::new(AttendanceMonitor::new(
            settings,
            MonitorDeps {
                remote: remote.clone(),
                store: store.clone(),
                notifier: notifier.clone(),
                location: location.clone(),
                clock,
            },
            queue.clone(),
            connectivity.clone(),
        ));
        let sync = Arc::new(SyncWorker::new(
            queue.clone(),
            remote.clone(),
            connectivity.clone(),
            config.sync.batch_size,
            config.queue.retain_synced,
        ));

        Self {
            config,
            pool,
            store,
            queue,
            remote,
            notifier,
            location,
            connectivity,
            monitor,
            sync,
        }
    }

    /// Starts the monitor and returns the control surface router.
    pub async fn start_app(&self) -> Router {
        self.monitor.start().await.expect("Failed to start monitor");
        self.app()
    }

    pub fn app(&self) -> Router {
        create_app(
            self.config.clone(),
            self.pool.clone(),
            self.monitor.clone(),
            self.sync.clone(),
        )
    }

    /// Submits a sample and waits until the evaluation loop has handled it.
    pub async fn push(&self, sample: LocationSample) {
        use geoattend_agent::services::SampleSource;

        let mut rx = self.monitor.subscribe();
        let target = rx.borrow().processed + 1;
        self.monitor
            .submit_sample(sample, SampleSource::Push)
            .await
            .expect("Monitor rejected sample");
        rx.wait_for(|snapshot| snapshot.processed >= target)
            .await
            .expect("Evaluation loop stopped");
    }
}

// ============================================================================
// Request helpers
// ============================================================================

/// Build a JSON request.
pub fn json_request(
    method: axum::http::Method,
    uri: &str,
    body: serde_json::Value,
) -> axum::http::Request<axum::body::Body> {
    use axum::{body::Body, http::{header, Request}};

    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Build a request without a body.
pub fn empty_request(method: axum::http::Method, uri: &str) -> axum::http::Request<axum::body::Body> {
    use axum::{body::Body, http::Request};

    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse response body as JSON.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

/// A location fix body stamped `seconds_ago` before now.
pub fn fix_body(latitude: f64, longitude: f64, seconds_ago: i64) -> serde_json::Value {
    json!({
        "timestamp": (Utc::now() - chrono::Duration::seconds(seconds_ago)).timestamp_millis(),
        "latitude": latitude,
        "longitude": longitude,
        "accuracy": 8.0
    })
}
