//! Error taxonomy for the attendance engine.
//!
//! None of these are fatal to the host process. Each one degrades to
//! "retry next cycle" or "disable the affected feature".

use thiserror::Error;

/// Location access failures reported by a [`LocationProvider`].
///
/// [`LocationProvider`]: crate::services::LocationProvider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("Location permission not granted")]
    PermissionDenied,

    #[error("No location fix available")]
    Unavailable,
}

/// Failures talking to the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Remote rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Timeout => "timeout",
            FetchError::Rejected { .. } => "rejected",
            FetchError::InvalidResponse(_) => "invalid_response",
            FetchError::Cancelled => "cancelled",
        }
    }
}

/// A geofence has no usable working-hours shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Geofence {geofence_id} has no usable working hours")]
    ScheduleAmbiguous { geofence_id: String },
}

/// Local state store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode state: {0}")]
    Encode(String),

    #[error("Failed to decode state: {0}")]
    Decode(String),
}

/// Rejected manual attendance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttendanceError {
    #[error("Already checked in today")]
    AlreadyCheckedIn,

    #[error("Not checked in")]
    NotCheckedIn,

    #[error("Attendance already completed for today")]
    DayCompleted,
}

impl AttendanceError {
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::AlreadyCheckedIn => "already_checked_in",
            AttendanceError::NotCheckedIn => "not_checked_in",
            AttendanceError::DayCompleted => "day_completed",
        }
    }
}

/// Monitor lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("Monitor is not running")]
    NotRunning,

    #[error("Monitor is already running")]
    AlreadyRunning,

    #[error("Monitor command channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Rejected {
            status: 503,
            message: "maintenance".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote rejected request with status 503: maintenance"
        );
        assert_eq!(err.kind(), "rejected");
        assert_eq!(FetchError::Timeout.kind(), "timeout");
    }

    #[test]
    fn test_attendance_error_codes() {
        assert_eq!(AttendanceError::AlreadyCheckedIn.code(), "already_checked_in");
        assert_eq!(AttendanceError::NotCheckedIn.code(), "not_checked_in");
        assert_eq!(AttendanceError::DayCompleted.code(), "day_completed");
    }
}
