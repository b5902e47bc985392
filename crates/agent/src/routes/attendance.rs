//! Attendance endpoints: today's record and manual punches.

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use domain::models::AttendanceDay;
use domain::services::PunchPosition;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::ManualPunch;

/// Body of a manual check-in or check-out. Every field is optional.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ManualAttendanceRequest {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: Option<f64>,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: Option<f64>,

    #[validate(custom(function = "shared::validation::validate_accuracy"))]
    pub accuracy: Option<f64>,

    #[validate(length(max = 500, message = "Notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

impl ManualAttendanceRequest {
    fn into_punch(self) -> ManualPunch {
        let position = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(PunchPosition {
                latitude,
                longitude,
                accuracy: self.accuracy,
            }),
            _ => None,
        };
        ManualPunch {
            position,
            notes: self.notes.filter(|n| !n.trim().is_empty()),
        }
    }
}

/// GET /api/v1/attendance/today
pub async fn get_today(State(state): State<AppState>) -> Json<AttendanceDay> {
    Json(state.monitor.today())
}

/// POST /api/v1/attendance/check-in
pub async fn check_in(
    State(state): State<AppState>,
    body: Option<Json<ManualAttendanceRequest>>,
) -> Result<Json<AttendanceDay>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let day = state.monitor.manual_check_in(request.into_punch()).await?;
    info!(date = %day.date, "Manual check-in");
    Ok(Json(day))
}

/// POST /api/v1/attendance/check-out
pub async fn check_out(
    State(state): State<AppState>,
    body: Option<Json<ManualAttendanceRequest>>,
) -> Result<Json<AttendanceDay>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let day = state.monitor.manual_check_out(request.into_punch()).await?;
    info!(date = %day.date, "Manual check-out");
    Ok(Json(day))
}
