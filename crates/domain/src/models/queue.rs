//! Offline queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attendance::{AttendanceEvent, AttendanceEventKind, ViolationEvent};
use super::location::LocationRecord;

/// Discriminant of a queued payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadKind {
    Location,
    CheckIn,
    CheckOut,
    Violation,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Location => "location",
            PayloadKind::CheckIn => "checkIn",
            PayloadKind::CheckOut => "checkOut",
            PayloadKind::Violation => "violation",
        }
    }
}

/// Payload carried by a queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueuePayload {
    Location(LocationRecord),
    Attendance(AttendanceEvent),
    Violation(ViolationEvent),
}

impl QueuePayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            QueuePayload::Location(_) => PayloadKind::Location,
            QueuePayload::Attendance(event) => match event.kind {
                AttendanceEventKind::CheckIn => PayloadKind::CheckIn,
                AttendanceEventKind::CheckOut => PayloadKind::CheckOut,
            },
            QueuePayload::Violation(_) => PayloadKind::Violation,
        }
    }

    /// Capture time used for queue ordering.
    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            QueuePayload::Location(record) => record.timestamp,
            QueuePayload::Attendance(event) => event.punch.time,
            QueuePayload::Violation(violation) => violation.occurred_at,
        }
    }
}

/// A pending or synced item in the offline queue.
///
/// Only the `synced` flag changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    pub payload_kind: PayloadKind,
    pub payload: QueuePayload,
    pub captured_at: DateTime<Utc>,
    pub synced: bool,
}

impl QueueEntry {
    pub fn new(payload: QueuePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload_kind: payload.kind(),
            captured_at: payload.captured_at(),
            payload,
            synced: false,
        }
    }
}

/// Summary counters for the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub synced: usize,
    pub unsynced: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub evicted_synced: u64,
    pub evicted_unsynced: u64,
    pub capacity: usize,
}

/// Serialized form persisted under the `offline_queue` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    #[serde(default)]
    pub evicted_synced: u64,
    #[serde(default)]
    pub evicted_unsynced: u64,
}
