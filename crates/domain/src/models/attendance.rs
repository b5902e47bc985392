//! Attendance domain model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an attendance day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceStatus {
    #[default]
    NotStarted,
    CheckedIn,
    Completed,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::NotStarted => "not-started",
            AttendanceStatus::CheckedIn => "checked-in",
            AttendanceStatus::Completed => "completed",
            AttendanceStatus::Absent => "absent",
        }
    }
}

/// Whether a punch was produced by geofence evaluation or a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchSource {
    Auto,
    Manual,
}

impl PunchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchSource::Auto => "auto",
            PunchSource::Manual => "manual",
        }
    }
}

/// A check-in or check-out instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePunch {
    pub time: DateTime<Utc>,
    pub geofence_id: Option<String>,
    pub source: PunchSource,
}

/// Attendance record for one user on one local calendar date.
///
/// Invariants: `check_out.time >= check_in.time` when both are present, and
/// a completed day is never modified again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceDay {
    pub user_id: String,
    pub date: NaiveDate,
    pub check_in: Option<AttendancePunch>,
    pub check_out: Option<AttendancePunch>,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub is_late: bool,
    #[serde(default)]
    pub late_by_minutes: i64,
    #[serde(default)]
    pub is_early_departure: bool,
    #[serde(default)]
    pub early_by_minutes: i64,
}

impl AttendanceDay {
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            check_in: None,
            check_out: None,
            status: AttendanceStatus::NotStarted,
            is_late: false,
            late_by_minutes: 0,
            is_early_departure: false,
            early_by_minutes: 0,
        }
    }

    /// True when there is a check-in without a matching check-out.
    pub fn is_open(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.status == AttendanceStatus::Completed
    }
}

/// Kind of attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceEventKind {
    CheckIn,
    CheckOut,
}

impl AttendanceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceEventKind::CheckIn => "check_in",
            AttendanceEventKind::CheckOut => "check_out",
        }
    }
}

/// Payload of `checkIn` / `checkOut` queue entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEvent {
    pub user_id: String,
    pub date: NaiveDate,
    pub kind: AttendanceEventKind,
    pub punch: AttendancePunch,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    EarlyDeparture,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::EarlyDeparture => "early_departure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Payload of `violation` queue entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub geofence_id: String,
    pub geofence_name: String,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::NotStarted).unwrap(),
            "\"not-started\""
        );
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::CheckedIn).unwrap(),
            "\"checked-in\""
        );
        assert_eq!(AttendanceStatus::Absent.as_str(), "absent");
    }

    #[test]
    fn test_new_day_is_not_open() {
        let day = AttendanceDay::new("u1", NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert!(!day.is_open());
        assert_eq!(day.status, AttendanceStatus::NotStarted);
    }

    #[test]
    fn test_violation_serialization() {
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
            notes: String::new(),
        };
        let json = serde_json::to_value(&violation).unwrap();
        assert_eq!(json["type"], "early_departure");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["geofenceId"], "hq");
    }
}
