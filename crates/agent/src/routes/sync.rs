//! Sync and offline queue endpoints.

use axum::{extract::State, Json};

use domain::models::QueueStats;

use crate::app::AppState;
use crate::services::SyncReport;

/// Run one sync cycle now.
///
/// POST /api/v1/sync
pub async fn sync_now(State(state): State<AppState>) -> Json<SyncReport> {
    Json(state.sync.sync_once().await)
}

/// GET /api/v1/queue
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.monitor.queue().stats().await)
}
