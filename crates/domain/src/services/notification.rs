//! Notification triggers raised by the attendance engine.
//!
//! Delivery is external. The engine hands triggers to a
//! [`NotificationDispatcher`], which decides how to show them.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::models::Severity;

/// Notification kind enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AutoCheckin,
    AutoCheckout,
    GeofenceEntry,
    GeofenceExit,
    GeofenceViolation,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AutoCheckin => "auto_checkin",
            NotificationKind::AutoCheckout => "auto_checkout",
            NotificationKind::GeofenceEntry => "geofence_entry",
            NotificationKind::GeofenceExit => "geofence_exit",
            NotificationKind::GeofenceViolation => "geofence_violation",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing notification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTrigger {
    pub kind: NotificationKind,
    pub geofence_id: String,
    pub geofence_name: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl NotificationTrigger {
    pub fn new(kind: NotificationKind, geofence_id: &str, geofence_name: &str) -> Self {
        let (title, body, severity) = match kind {
            NotificationKind::AutoCheckin => (
                "Auto Check-in Successful".to_string(),
                format!("You were automatically checked in at {}", geofence_name),
                None,
            ),
            NotificationKind::AutoCheckout => (
                "Auto Check-out".to_string(),
                format!("You were automatically checked out from {}", geofence_name),
                None,
            ),
            NotificationKind::GeofenceEntry => (
                format!("Entered {}", geofence_name),
                "You are now within the designated work area".to_string(),
                None,
            ),
            NotificationKind::GeofenceExit => (
                format!("Left {}", geofence_name),
                "You have exited the designated work area".to_string(),
                None,
            ),
            NotificationKind::GeofenceViolation => (
                "Early Departure Alert".to_string(),
                format!(
                    "You left {} before completing your work hours.",
                    geofence_name
                ),
                Some(Severity::High),
            ),
        };

        Self {
            kind,
            geofence_id: geofence_id.to_string(),
            geofence_name: geofence_name.to_string(),
            title,
            body,
            severity,
        }
    }
}

/// Result of a notification dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationResult {
    /// Notification was handed to the delivery channel.
    Sent,
    /// Dispatch failed (non-blocking for the engine).
    Failed(String),
    /// Notification was intentionally not delivered.
    Skipped,
}

/// Delivery channel for notification triggers.
#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, trigger: &NotificationTrigger) -> NotificationResult;
}

/// Dispatcher that only writes triggers to the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotificationDispatcher;

#[async_trait::async_trait]
impl NotificationDispatcher for LoggingNotificationDispatcher {
    async fn dispatch(&self, trigger: &NotificationTrigger) -> NotificationResult {
        tracing::info!(
            kind = %trigger.kind,
            geofence_id = %trigger.geofence_id,
            title = %trigger.title,
            body = %trigger.body,
            "Notification"
        );
        NotificationResult::Sent
    }
}

/// Mock dispatcher for testing. Records every trigger it receives.
#[derive(Debug, Default)]
pub struct MockNotificationDispatcher {
    /// Whether to simulate failures for testing.
    pub simulate_failure: bool,
    sent: Mutex<Vec<NotificationTrigger>>,
}

impl MockNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock dispatcher that simulates failures.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<NotificationTrigger> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent().iter().map(|t| t.kind).collect()
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for MockNotificationDispatcher {
    async fn dispatch(&self, trigger: &NotificationTrigger) -> NotificationResult {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(trigger.clone());
        }
        if self.simulate_failure {
            tracing::warn!(kind = %trigger.kind, "Mock dispatcher simulating failure");
            return NotificationResult::Failed("Simulated failure".to_string());
        }
        NotificationResult::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_kind_display() {
        assert_eq!(NotificationKind::AutoCheckin.to_string(), "auto_checkin");
        assert_eq!(
            NotificationKind::GeofenceViolation.to_string(),
            "geofence_violation"
        );
        assert_eq!(
            serde_json::to_string(&NotificationKind::GeofenceExit).unwrap(),
            "\"geofence_exit\""
        );
    }

    #[test]
    fn test_trigger_texts() {
        let checkin = NotificationTrigger::new(NotificationKind::AutoCheckin, "hq", "Head Office");
        assert_eq!(checkin.title, "Auto Check-in Successful");
        assert!(checkin.body.contains("Head Office"));
        assert!(checkin.severity.is_none());

        let violation =
            NotificationTrigger::new(NotificationKind::GeofenceViolation, "hq", "Head Office");
        assert_eq!(violation.title, "Early Departure Alert");
        assert_eq!(violation.severity, Some(Severity::High));
    }

    #[tokio::test]
    async fn test_mock_dispatcher_records() {
        let dispatcher = MockNotificationDispatcher::new();
        let trigger = NotificationTrigger::new(NotificationKind::GeofenceEntry, "a", "A");
        assert_eq!(dispatcher.dispatch(&trigger).await, NotificationResult::Sent);
        assert_eq!(dispatcher.kinds(), vec![NotificationKind::GeofenceEntry]);
    }

    #[tokio::test]
    async fn test_mock_dispatcher_failure() {
        let dispatcher = MockNotificationDispatcher::failing();
        let trigger = NotificationTrigger::new(NotificationKind::GeofenceExit, "a", "A");
        assert!(matches!(
            dispatcher.dispatch(&trigger).await,
            NotificationResult::Failed(_)
        ));
        assert_eq!(dispatcher.sent().len(), 1);
    }
}
