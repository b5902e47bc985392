//! Domain models for the attendance engine.

pub mod attendance;
pub mod geofence;
pub mod location;
pub mod queue;

pub use attendance::{
    AttendanceDay, AttendanceEvent, AttendanceEventKind, AttendancePunch, AttendanceStatus,
    PunchSource, Severity, ViolationEvent, ViolationType,
};
pub use geofence::{
    Geofence, GeofenceAlerts, GeofencePayload, GeofenceRejection, ResolvedFence, ShiftWindow,
    WeeklyHours, WorkingHours,
};
pub use location::{
    GeoPoint, LocationFix, LocationFixBatch, LocationRecord, LocationSample, TrackingType,
};
pub use queue::{PayloadKind, QueueEntry, QueuePayload, QueueSnapshot, QueueStats};
