//! Location push endpoints used by the OS location bridge.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use domain::models::{LocationFix, LocationFixBatch};

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::SampleSource;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub accepted: usize,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub granted: bool,
}

#[derive(Debug, Serialize)]
pub struct PermissionResponse {
    pub granted: bool,
}

fn invalid_timestamp() -> ApiError {
    ApiError::Validation("Invalid timestamp".to_string())
}

/// Push one fix into the evaluation channel.
///
/// POST /api/v1/locations
pub async fn push_location(
    State(state): State<AppState>,
    Json(fix): Json<LocationFix>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    fix.validate()?;
    let sample = fix.into_sample().ok_or_else(invalid_timestamp)?;

    state.monitor.submit_sample(sample, SampleSource::Push).await?;
    debug!("Location fix accepted");

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: 1 })))
}

/// Push 1-50 fixes. The batch is validated as a whole before any fix is
/// queued.
///
/// POST /api/v1/locations/batch
pub async fn push_batch(
    State(state): State<AppState>,
    Json(batch): Json<LocationFixBatch>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    batch.validate()?;
    let samples = batch
        .locations
        .into_iter()
        .map(|fix| fix.into_sample().ok_or_else(invalid_timestamp))
        .collect::<Result<Vec<_>, _>>()?;

    let accepted = samples.len();
    for sample in samples {
        state.monitor.submit_sample(sample, SampleSource::Push).await?;
    }
    info!(accepted, "Location batch accepted");

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted })))
}

/// The bridge reports the OS location permission.
///
/// POST /api/v1/location-permission
pub async fn set_permission(
    State(state): State<AppState>,
    Json(request): Json<PermissionRequest>,
) -> Json<PermissionResponse> {
    state.monitor.set_permission(request.granted);
    Json(PermissionResponse {
        granted: state.monitor.permission_granted(),
    })
}
