//! Monitor status endpoint.

use axum::{extract::State, Json};

use crate::app::AppState;
use crate::services::MonitorStatus;

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<MonitorStatus> {
    Json(state.monitor.status().await)
}
