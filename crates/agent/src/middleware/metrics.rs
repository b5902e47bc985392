//! Prometheus metrics middleware and business recorders.
//!
//! Provides HTTP request/response metrics collection, the `/metrics`
//! exporter and the engine counters.

use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use domain::services::{NotificationKind, QueueOverflow};

/// Middleware to record HTTP request metrics.
///
/// Records the following metrics:
/// - `http_requests_total`: Counter with labels (method, path, status)
/// - `http_request_duration_seconds`: Histogram with labels (method, path)
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let method_str = method_to_str(&method);

    counter!(
        "http_requests_total",
        "method" => method_str.to_string(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method_str.to_string(),
        "path" => path
    )
    .record(duration);

    response
}

/// Convert HTTP method to string for metric labels.
fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

// ============================================================================
// Engine metrics
// ============================================================================

pub fn record_sample_evaluated() {
    counter!("samples_evaluated_total").increment(1);
}

pub fn record_sample_rejected(reason: &'static str) {
    counter!("samples_rejected_total", "reason" => reason).increment(1);
}

pub fn record_attendance_event(kind: &'static str) {
    counter!("attendance_events_total", "kind" => kind).increment(1);
}

pub fn record_notification_dispatched(kind: NotificationKind) {
    counter!("notifications_dispatched_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_duplicate_suppressed() {
    counter!("duplicate_events_suppressed_total").increment(1);
}

pub fn record_queue_overflow(overflow: &QueueOverflow) {
    if overflow.evicted_synced > 0 {
        counter!("offline_queue_evicted_total", "class" => "synced")
            .increment(overflow.evicted_synced as u64);
    }
    if overflow.evicted_unsynced > 0 {
        counter!("offline_queue_evicted_total", "class" => "unsynced")
            .increment(overflow.evicted_unsynced as u64);
    }
}

pub fn record_queue_pending(pending: usize) {
    gauge!("offline_queue_pending").set(pending as f64);
}

pub fn record_sync_entries(outcome: &'static str, count: usize) {
    if count > 0 {
        counter!("sync_entries_total", "outcome" => outcome).increment(count as u64);
    }
}

pub fn record_catalog_refresh(outcome: &'static str) {
    counter!("catalog_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_containment_disagreement() {
    counter!("containment_disagreements_total").increment(1);
}

/// Handler for /metrics endpoint that returns Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
    } else {
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        )
    }
}

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once during startup before any metrics are recorded.
pub fn init_metrics() -> Result<(), BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(&[0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 15.0])?
        .install_recorder()?;

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Prometheus handle already initialized");
    }
    Ok(())
}
