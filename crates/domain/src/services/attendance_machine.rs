//! Attendance state machine.
//!
//! One instance per `(user, local date)`. It turns containment changes and
//! working hours into check-in, check-out and violation events. Repeated
//! identical observations are deduplicated by current state, so the caller
//! can feed it every evaluation tick.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AttendanceError;
use crate::models::{
    AttendanceDay, AttendanceEvent, AttendanceEventKind, AttendancePunch, AttendanceStatus,
    LocationSample, PunchSource, ResolvedFence, Severity, ViolationEvent, ViolationType,
};
use crate::services::notification::{NotificationKind, NotificationTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Outside,
    InsideOutsideHours,
    InsideAwaitingCheckIn,
    CheckedIn,
    CompletedToday,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Outside => "outside",
            MachineState::InsideOutsideHours => "inside_outside_hours",
            MachineState::InsideAwaitingCheckIn => "inside_awaiting_check_in",
            MachineState::CheckedIn => "checked_in",
            MachineState::CompletedToday => "completed_today",
        }
    }
}

/// One evaluated sample fed into the machine.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Active fence from the evaluator, if any.
    pub contained: Option<Arc<ResolvedFence>>,
    pub sample: LocationSample,
    /// Instant the observation applies to.
    pub at: DateTime<Utc>,
}

/// Position attached to a manual punch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: MachineState,
    pub to: MachineState,
}

/// Events to be queued for the remote authority.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    Attendance(AttendanceEvent),
    Violation(ViolationEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Same input as before; nothing to do in the current state.
    Repeated,
    /// Observation older than the last one seen.
    Stale,
}

/// Marker for a step that changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateEventSuppressed {
    pub state: MachineState,
    pub reason: SuppressReason,
}

/// Everything a single observation or manual action produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    pub transitions: Vec<StateChange>,
    pub events: Vec<MachineEvent>,
    pub notifications: Vec<NotificationTrigger>,
    pub suppressed: Option<DuplicateEventSuppressed>,
}

impl Step {
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceStateMachine {
    day: AttendanceDay,
    state: MachineState,
    utc_offset: FixedOffset,
    current_fence: Option<Arc<ResolvedFence>>,
    containment_since: Option<DateTime<Utc>>,
    checked_in_fence: Option<Arc<ResolvedFence>>,
    last_observed_at: Option<DateTime<Utc>>,
    suppressed_count: u64,
}

impl AttendanceStateMachine {
    pub fn new(user_id: impl Into<String>, date: NaiveDate, utc_offset: FixedOffset) -> Self {
        Self {
            day: AttendanceDay::new(user_id, date),
            state: MachineState::Outside,
            utc_offset,
            current_fence: None,
            containment_since: None,
            checked_in_fence: None,
            last_observed_at: None,
            suppressed_count: 0,
        }
    }

    /// Rebuilds a machine from a persisted day.
    ///
    /// An open day resumes as `CheckedIn`, assuming the user is still inside
    /// `fence`; a completed day resumes as `CompletedToday`.
    pub fn restore(day: AttendanceDay, utc_offset: FixedOffset, fence: Option<Arc<ResolvedFence>>) -> Self {
        let state = if day.is_completed() {
            MachineState::CompletedToday
        } else if day.is_open() {
            MachineState::CheckedIn
        } else {
            MachineState::Outside
        };
        let (current_fence, checked_in_fence) = if state == MachineState::CheckedIn {
            (fence.clone(), fence)
        } else {
            (None, None)
        };
        let containment_since = current_fence
            .as_ref()
            .and(day.check_in.as_ref().map(|punch| punch.time));

        Self {
            day,
            state,
            utc_offset,
            current_fence,
            containment_since,
            checked_in_fence,
            last_observed_at: None,
            suppressed_count: 0,
        }
    }

    /// Id of the fence behind an open check-in whose fence was not known
    /// when the machine was restored.
    pub fn unbound_fence_id(&self) -> Option<&str> {
        if self.state != MachineState::CheckedIn || self.checked_in_fence.is_some() {
            return None;
        }
        self.day
            .check_in
            .as_ref()
            .and_then(|punch| punch.geofence_id.as_deref())
    }

    /// Attaches the fence of a restored open check-in once the catalog
    /// knows it. The user is taken to still be inside that fence, so the
    /// next sample outside it checks out.
    pub fn bind_checked_in_fence(&mut self, fence: Arc<ResolvedFence>) -> bool {
        if self.unbound_fence_id() != Some(fence.id()) {
            return false;
        }
        if self.current_fence.is_none() {
            self.containment_since = self.day.check_in.as_ref().map(|punch| punch.time);
            self.current_fence = Some(Arc::clone(&fence));
        }
        self.checked_in_fence = Some(fence);
        true
    }

    pub fn day(&self) -> &AttendanceDay {
        &self.day
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn current_fence(&self) -> Option<&Arc<ResolvedFence>> {
        self.current_fence.as_ref()
    }

    pub fn containment_since(&self) -> Option<DateTime<Utc>> {
        self.containment_since
    }

    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.last_observed_at
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed_count
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Finalizes the day. A day that never started becomes `absent`.
    pub fn finish_day(&mut self) -> AttendanceDay {
        if self.day.status == AttendanceStatus::NotStarted {
            self.day.status = AttendanceStatus::Absent;
        }
        self.day.clone()
    }

    /// Feeds one evaluated sample into the machine.
    pub fn observe(&mut self, observation: Observation) -> Step {
        if self.last_observed_at.is_some_and(|last| observation.at < last) {
            return self.suppress(SuppressReason::Stale);
        }
        self.last_observed_at = Some(observation.at);

        let local = self.local(observation.at);
        let previous = self.current_fence.clone();
        let mut step = Step::default();

        match (previous, observation.contained.clone()) {
            (None, None) => {}
            (None, Some(entered)) => {
                self.set_containment(Some(Arc::clone(&entered)), observation.at);
                self.handle_inside(&entered, true, &observation, local, &mut step);
            }
            (Some(left), None) => {
                self.set_containment(None, observation.at);
                self.handle_exit(&left, &observation, local, &mut step);
            }
            (Some(left), Some(entered)) if left.id() != entered.id() => {
                self.set_containment(Some(Arc::clone(&entered)), observation.at);
                if left.fence.alerts.on_exit {
                    step.notifications
                        .push(NotificationTrigger::new(NotificationKind::GeofenceExit, left.id(), &left.fence.name));
                }
                self.handle_inside(&entered, true, &observation, local, &mut step);
            }
            (Some(_), Some(inside)) => {
                self.handle_inside(&inside, false, &observation, local, &mut step);
            }
        }

        if step.is_noop() {
            let notifications = std::mem::take(&mut step.notifications);
            step = self.suppress(SuppressReason::Repeated);
            step.notifications = notifications;
        }
        step
    }

    /// Manual check-in. Allowed from any state without a check-in.
    pub fn manual_check_in(
        &mut self,
        at: DateTime<Utc>,
        position: Option<PunchPosition>,
        notes: Option<String>,
    ) -> Result<Step, AttendanceError> {
        if self.day.is_completed() {
            return Err(AttendanceError::DayCompleted);
        }
        if self.day.check_in.is_some() {
            return Err(AttendanceError::AlreadyCheckedIn);
        }

        let local = self.local(at);
        let fence = self.current_fence.clone();
        let mut step = Step::default();
        let notes = notes.unwrap_or_else(|| "Manual check-in".to_string());
        self.check_in(fence.as_ref(), at, local, PunchSource::Manual, position, notes, &mut step);
        Ok(step)
    }

    /// Manual check-out. Allowed only while checked in.
    pub fn manual_check_out(
        &mut self,
        at: DateTime<Utc>,
        position: Option<PunchPosition>,
        notes: Option<String>,
    ) -> Result<Step, AttendanceError> {
        if self.day.is_completed() {
            return Err(AttendanceError::DayCompleted);
        }
        if !self.day.is_open() {
            return Err(AttendanceError::NotCheckedIn);
        }

        let local = self.local(at);
        let fence = self
            .checked_in_fence
            .clone()
            .or_else(|| self.current_fence.clone());
        let mut step = Step::default();
        let notes = notes.unwrap_or_else(|| "Manual check-out".to_string());
        self.check_out(fence.as_ref(), at, local, PunchSource::Manual, position, notes, &mut step);
        Ok(step)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn handle_inside(
        &mut self,
        fence: &Arc<ResolvedFence>,
        entered: bool,
        observation: &Observation,
        local: NaiveDateTime,
        step: &mut Step,
    ) {
        let can_check_in = matches!(
            self.state,
            MachineState::Outside | MachineState::InsideOutsideHours | MachineState::InsideAwaitingCheckIn
        ) && self.day.check_in.is_none();

        if can_check_in && fence.within_hours(local) {
            self.transition(MachineState::InsideAwaitingCheckIn, step);
            let position = PunchPosition {
                latitude: observation.sample.latitude,
                longitude: observation.sample.longitude,
                accuracy: Some(observation.sample.accuracy_meters),
            };
            let notes = format!("Auto check-in at {}", fence.fence.name);
            self.check_in(
                Some(fence),
                observation.at,
                local,
                PunchSource::Auto,
                Some(position),
                notes,
                step,
            );
            step.notifications
                .push(NotificationTrigger::new(NotificationKind::AutoCheckin, fence.id(), &fence.fence.name));
            return;
        }

        if can_check_in {
            self.transition(MachineState::InsideOutsideHours, step);
        }
        if entered && fence.fence.alerts.on_entry {
            step.notifications
                .push(NotificationTrigger::new(NotificationKind::GeofenceEntry, fence.id(), &fence.fence.name));
        }
    }

    fn handle_exit(
        &mut self,
        fence: &Arc<ResolvedFence>,
        observation: &Observation,
        local: NaiveDateTime,
        step: &mut Step,
    ) {
        match self.state {
            MachineState::CheckedIn if self.day.is_open() => {
                let position = PunchPosition {
                    latitude: observation.sample.latitude,
                    longitude: observation.sample.longitude,
                    accuracy: Some(observation.sample.accuracy_meters),
                };
                let notes = format!("Auto check-out from {}", fence.fence.name);
                self.check_out(
                    Some(fence),
                    observation.at,
                    local,
                    PunchSource::Auto,
                    Some(position),
                    notes,
                    step,
                );
                step.notifications.push(NotificationTrigger::new(
                    NotificationKind::AutoCheckout,
                    fence.id(),
                    &fence.fence.name,
                ));

                if fence.within_hours(local) {
                    step.events.push(MachineEvent::Violation(ViolationEvent {
                        user_id: self.day.user_id.clone(),
                        date: self.day.date,
                        violation_type: ViolationType::EarlyDeparture,
                        geofence_id: fence.id().to_string(),
                        geofence_name: fence.fence.name.clone(),
                        severity: Severity::High,
                        occurred_at: observation.at,
                        latitude: observation.sample.latitude,
                        longitude: observation.sample.longitude,
                        notes: format!(
                            "User exited {} during working hours without checking out",
                            fence.fence.name
                        ),
                    }));
                    step.notifications.push(NotificationTrigger::new(
                        NotificationKind::GeofenceViolation,
                        fence.id(),
                        &fence.fence.name,
                    ));
                }
            }
            MachineState::CompletedToday | MachineState::CheckedIn => {}
            _ => self.transition(MachineState::Outside, step),
        }

        if fence.fence.alerts.on_exit {
            step.notifications
                .push(NotificationTrigger::new(NotificationKind::GeofenceExit, fence.id(), &fence.fence.name));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_in(
        &mut self,
        fence: Option<&Arc<ResolvedFence>>,
        at: DateTime<Utc>,
        local: NaiveDateTime,
        source: PunchSource,
        position: Option<PunchPosition>,
        notes: String,
        step: &mut Step,
    ) {
        let punch = AttendancePunch {
            time: at,
            geofence_id: fence.map(|f| f.id().to_string()),
            source,
        };

        let late_by = fence
            .and_then(|f| f.hours.for_date(local.date()))
            .map(|window| shared::time::minutes_after(local, local.date().and_time(window.start)))
            .unwrap_or(0);

        self.day.check_in = Some(punch.clone());
        self.day.status = AttendanceStatus::CheckedIn;
        self.day.late_by_minutes = late_by;
        self.day.is_late = late_by > 0;
        self.checked_in_fence = fence.cloned();

        self.transition(MachineState::CheckedIn, step);
        step.events.push(MachineEvent::Attendance(self.event(
            AttendanceEventKind::CheckIn,
            punch,
            position,
            notes,
        )));
    }

    #[allow(clippy::too_many_arguments)]
    fn check_out(
        &mut self,
        fence: Option<&Arc<ResolvedFence>>,
        at: DateTime<Utc>,
        local: NaiveDateTime,
        source: PunchSource,
        position: Option<PunchPosition>,
        notes: String,
        step: &mut Step,
    ) {
        let checked_in_at = self.day.check_in.as_ref().map(|p| p.time).unwrap_or(at);
        let punch = AttendancePunch {
            time: at.max(checked_in_at),
            geofence_id: fence.map(|f| f.id().to_string()),
            source,
        };

        let early_by = fence
            .and_then(|f| f.hours.for_date(local.date()))
            .map(|window| shared::time::minutes_after(local.date().and_time(window.end), local))
            .unwrap_or(0);

        self.day.check_out = Some(punch.clone());
        self.day.status = AttendanceStatus::Completed;
        self.day.early_by_minutes = early_by;
        self.day.is_early_departure = early_by > 0;

        self.transition(MachineState::CompletedToday, step);
        step.events.push(MachineEvent::Attendance(self.event(
            AttendanceEventKind::CheckOut,
            punch,
            position,
            notes,
        )));
    }

    fn event(
        &self,
        kind: AttendanceEventKind,
        punch: AttendancePunch,
        position: Option<PunchPosition>,
        notes: String,
    ) -> AttendanceEvent {
        AttendanceEvent {
            user_id: self.day.user_id.clone(),
            date: self.day.date,
            kind,
            punch,
            latitude: position.map(|p| p.latitude),
            longitude: position.map(|p| p.longitude),
            accuracy: position.and_then(|p| p.accuracy),
            notes,
        }
    }

    fn transition(&mut self, to: MachineState, step: &mut Step) {
        if self.state != to {
            step.transitions.push(StateChange { from: self.state, to });
            tracing::debug!(from = self.state.as_str(), to = to.as_str(), "Attendance state change");
            self.state = to;
        }
    }

    fn set_containment(&mut self, fence: Option<Arc<ResolvedFence>>, at: DateTime<Utc>) {
        self.containment_since = fence.as_ref().map(|_| at);
        self.current_fence = fence;
    }

    fn suppress(&mut self, reason: SuppressReason) -> Step {
        self.suppressed_count += 1;
        Step {
            suppressed: Some(DuplicateEventSuppressed {
                state: self.state,
                reason,
            }),
            ..Step::default()
        }
    }

    fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.utc_offset).naive_local()
    }
}
