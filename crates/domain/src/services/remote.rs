//! Remote authority abstraction and its wire types.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FetchError;
use crate::models::{AttendanceEvent, GeoPoint, GeofencePayload, LocationRecord, ViolationEvent};

/// Body of `POST /attendance/check-in` and `POST /attendance/check-out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSubmission {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&AttendanceEvent> for AttendanceSubmission {
    fn from(event: &AttendanceEvent) -> Self {
        Self {
            latitude: event.latitude,
            longitude: event.longitude,
            accuracy: event.accuracy,
            notes: event.notes.clone(),
            timestamp: event.punch.time,
        }
    }
}

/// How the remote answered an attendance submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// The remote already holds this event (HTTP 409).
    AlreadyRecorded,
}

/// One element of `POST /location/batch`.
///
/// Violations travel through the same endpoint with
/// `trackingType = "violation"` and the violation fields set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBatchItem {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub tracking_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub violation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geofence_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geofence_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&LocationRecord> for LocationBatchItem {
    fn from(record: &LocationRecord) -> Self {
        Self {
            latitude: record.latitude,
            longitude: record.longitude,
            accuracy: Some(record.accuracy),
            altitude: record.altitude,
            speed: record.speed,
            heading: record.heading,
            timestamp: record.timestamp,
            tracking_type: record.tracking_type.as_str().to_string(),
            violation: false,
            violation_type: None,
            geofence_id: None,
            geofence_name: None,
            severity: None,
            notes: None,
        }
    }
}

impl From<&ViolationEvent> for LocationBatchItem {
    fn from(violation: &ViolationEvent) -> Self {
        Self {
            latitude: violation.latitude,
            longitude: violation.longitude,
            accuracy: None,
            altitude: None,
            speed: None,
            heading: None,
            timestamp: violation.occurred_at,
            tracking_type: "violation".to_string(),
            violation: true,
            violation_type: Some(violation.violation_type.as_str().to_string()),
            geofence_id: Some(violation.geofence_id.clone()),
            geofence_name: Some(violation.geofence_name.clone()),
            severity: Some("high".to_string()),
            notes: Some(violation.notes.clone()),
        }
    }
}

/// Answer of `POST /geofences/check`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainmentCheck {
    pub is_inside: bool,
    #[serde(default)]
    pub geofences: Vec<GeofencePayload>,
}

/// The server side of attendance: catalog source, sync target and
/// authoritative containment check.
#[async_trait::async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn fetch_geofences(&self) -> Result<Vec<GeofencePayload>, FetchError>;

    async fn check_containment(&self, point: GeoPoint) -> Result<ContainmentCheck, FetchError>;

    async fn submit_check_in(&self, submission: &AttendanceSubmission) -> Result<SubmitOutcome, FetchError>;

    async fn submit_check_out(&self, submission: &AttendanceSubmission) -> Result<SubmitOutcome, FetchError>;

    async fn submit_location_batch(&self, items: &[LocationBatchItem]) -> Result<(), FetchError>;
}

// ============================================================================
// Mock
// ============================================================================

/// A call observed by [`MockRemoteAuthority`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    FetchGeofences,
    CheckContainment(GeoPoint),
    CheckIn(AttendanceSubmission),
    CheckOut(AttendanceSubmission),
    LocationBatch(Vec<LocationBatchItem>),
}

#[derive(Debug, Default)]
struct MockState {
    geofences: Vec<GeofencePayload>,
    calls: Vec<RemoteCall>,
    submissions: usize,
    fail_submissions: Vec<usize>,
    offline: bool,
    conflict_on_attendance: bool,
    inside: bool,
}

/// Mock remote authority for testing.
///
/// Records every call and can be told to fail specific submissions
/// (counted from 1 across check-in, check-out and batch calls).
#[derive(Debug, Default)]
pub struct MockRemoteAuthority {
    state: Mutex<MockState>,
}

impl MockRemoteAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geofences(geofences: Vec<GeofencePayload>) -> Self {
        let mock = Self::new();
        mock.set_geofences(geofences);
        mock
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn set_geofences(&self, geofences: Vec<GeofencePayload>) {
        self.with_state(|s| s.geofences = geofences);
    }

    /// Every call fails with a network error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.with_state(|s| s.offline = offline);
    }

    /// Fails the `n`-th submission (1-based).
    pub fn fail_submission(&self, n: usize) {
        self.with_state(|s| s.fail_submissions.push(n));
    }

    /// Attendance submissions answer as if already recorded (HTTP 409).
    pub fn set_conflict_on_attendance(&self, conflict: bool) {
        self.with_state(|s| s.conflict_on_attendance = conflict);
    }

    /// Value reported by `check_containment`.
    pub fn set_inside(&self, inside: bool) {
        self.with_state(|s| s.inside = inside);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.with_state(|s| s.calls.clone())
    }

    /// Location batches submitted so far.
    pub fn batches(&self) -> Vec<Vec<LocationBatchItem>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::LocationBatch(items) => Some(items),
                _ => None,
            })
            .collect()
    }

    fn submit(&self, call: RemoteCall) -> Result<(), FetchError> {
        self.with_state(|s| {
            s.calls.push(call);
            s.submissions += 1;
            if s.offline {
                return Err(FetchError::Network("offline".to_string()));
            }
            if s.fail_submissions.contains(&s.submissions) {
                return Err(FetchError::Rejected {
                    status: 503,
                    message: "Simulated failure".to_string(),
                });
            }
            Ok(())
        })
    }

    fn attendance_outcome(&self) -> SubmitOutcome {
        if self.with_state(|s| s.conflict_on_attendance) {
            SubmitOutcome::AlreadyRecorded
        } else {
            SubmitOutcome::Accepted
        }
    }
}

#[async_trait::async_trait]
impl RemoteAuthority for MockRemoteAuthority {
    async fn fetch_geofences(&self) -> Result<Vec<GeofencePayload>, FetchError> {
        self.with_state(|s| {
            s.calls.push(RemoteCall::FetchGeofences);
            if s.offline {
                Err(FetchError::Network("offline".to_string()))
            } else {
                Ok(s.geofences.clone())
            }
        })
    }

    async fn check_containment(&self, point: GeoPoint) -> Result<ContainmentCheck, FetchError> {
        self.with_state(|s| {
            s.calls.push(RemoteCall::CheckContainment(point));
            if s.offline {
                Err(FetchError::Network("offline".to_string()))
            } else {
                Ok(ContainmentCheck {
                    is_inside: s.inside,
                    geofences: Vec::new(),
                })
            }
        })
    }

    async fn submit_check_in(&self, submission: &AttendanceSubmission) -> Result<SubmitOutcome, FetchError> {
        self.submit(RemoteCall::CheckIn(submission.clone()))?;
        Ok(self.attendance_outcome())
    }

    async fn submit_check_out(&self, submission: &AttendanceSubmission) -> Result<SubmitOutcome, FetchError> {
        self.submit(RemoteCall::CheckOut(submission.clone()))?;
        Ok(self.attendance_outcome())
    }

    async fn submit_location_batch(&self, items: &[LocationBatchItem]) -> Result<(), FetchError> {
        self.submit(RemoteCall::LocationBatch(items.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, TrackingType, ViolationType};
    use chrono::NaiveDate;

    #[test]
    fn test_violation_batch_item() {
        let violation = ViolationEvent {
            user_id: "u1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            violation_type: ViolationType::EarlyDeparture,
            geofence_id: "hq".to_string(),
            geofence_name: "HQ".to_string(),
            severity: Severity::High,
            occurred_at: Utc::now(),
            latitude: 1.0,
            longitude: 2.0,
            notes: "left early".to_string(),
        };
        let item = LocationBatchItem::from(&violation);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["trackingType"], "violation");
        assert_eq!(json["violation"], true);
        assert_eq!(json["violationType"], "early_departure");
        assert_eq!(json["severity"], "high");
    }

    #[test]
    fn test_location_batch_item_omits_violation_fields() {
        let record = LocationRecord {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 4.0,
            altitude: None,
            speed: None,
            heading: None,
            timestamp: Utc::now(),
            tracking_type: TrackingType::Background,
        };
        let json = serde_json::to_value(LocationBatchItem::from(&record)).unwrap();
        assert_eq!(json["trackingType"], "background");
        assert!(json.get("violation").is_none());
        assert!(json.get("geofenceId").is_none());
    }

    #[tokio::test]
    async fn test_mock_fails_requested_submission() {
        let mock = MockRemoteAuthority::new();
        mock.fail_submission(2);
        assert!(mock.submit_location_batch(&[]).await.is_ok());
        assert!(mock.submit_location_batch(&[]).await.is_err());
        assert!(mock.submit_location_batch(&[]).await.is_ok());
        assert_eq!(mock.batches().len(), 3);
    }
}
