//! Attendance monitor service.
//!
//! Owns the single evaluation loop. Timer-polled and pushed location fixes,
//! as well as manual check-in/check-out commands, travel one bounded
//! channel, so the state machine and the queue it appends to have exactly
//! one writer. Network work (catalog refresh, sync, containment
//! corroboration) runs on other tasks and never blocks an evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use domain::errors::{AttendanceError, FetchError, LocationError, MonitorError, StoreError};
use domain::models::{
    AttendanceDay, AttendanceEventKind, GeoPoint, LocationSample, QueueEntry, QueuePayload,
    QueueStats, ResolvedFence, TrackingType,
};
use domain::services::{
    evaluate, AttendanceStateMachine, CatalogLoad, Clock, DurableQueue, GeofenceCatalog,
    LocationProvider, MachineEvent, MachineState, NotificationDispatcher, NotificationResult,
    NotificationTrigger, Observation, PunchPosition, RemoteAuthority, StateStore, Step,
    ATTENDANCE_STATE_KEY,
};

use crate::config::{Config, ConfigValidationError};
use crate::middleware::metrics::{
    record_attendance_event, record_catalog_refresh, record_containment_disagreement,
    record_duplicate_suppressed, record_notification_dispatched, record_queue_overflow,
    record_queue_pending, record_sample_evaluated, record_sample_rejected,
};
use crate::services::sync_worker::Connectivity;

// ============================================================================
// Settings and collaborators
// ============================================================================

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub user_id: String,
    pub utc_offset: FixedOffset,
    pub channel_capacity: usize,
    pub corroborate_with_server: bool,
    pub sync_on_append: bool,
    /// Upper bound for every remote call made by the monitor.
    pub remote_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigValidationError> {
        let minutes = config.monitoring.utc_offset_minutes;
        let utc_offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
            ConfigValidationError::InvalidValue(format!("utc_offset_minutes out of range: {}", minutes))
        })?;

        Ok(Self {
            user_id: config.monitoring.user_id.clone(),
            utc_offset,
            channel_capacity: config.monitoring.channel_capacity.max(1),
            corroborate_with_server: config.monitoring.corroborate_with_server,
            sync_on_append: config.sync.sync_on_append,
            remote_timeout: config.remote_timeout(),
        })
    }
}

/// Injected collaborators.
#[derive(Clone)]
pub struct MonitorDeps {
    pub remote: Arc<dyn RemoteAuthority>,
    pub store: Arc<dyn StateStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub location: Arc<dyn LocationProvider>,
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// Commands
// ============================================================================

/// Where a location fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    /// Read by the polling job.
    Timer,
    /// Delivered by the OS location bridge.
    Push,
}

impl SampleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleSource::Timer => "timer",
            SampleSource::Push => "push",
        }
    }

    fn tracking_type(self) -> TrackingType {
        match self {
            SampleSource::Timer => TrackingType::Foreground,
            SampleSource::Push => TrackingType::Background,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationInput {
    pub sample: LocationSample,
    pub source: SampleSource,
    pub received_at: DateTime<Utc>,
}

/// Parameters of a manual check-in or check-out.
#[derive(Debug, Clone, Default)]
pub struct ManualPunch {
    pub position: Option<PunchPosition>,
    pub notes: Option<String>,
}

/// Failure of a command sent to the evaluation loop.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Attendance(#[from] AttendanceError),
}

type Reply = oneshot::Sender<Result<AttendanceDay, AttendanceError>>;

enum Command {
    Sample(LocationInput),
    CheckIn { punch: ManualPunch, reply: Reply },
    CheckOut { punch: ManualPunch, reply: Reply },
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FenceRef {
    pub id: String,
    pub name: String,
}

impl From<&ResolvedFence> for FenceRef {
    fn from(fence: &ResolvedFence) -> Self {
        Self {
            id: fence.fence.id.clone(),
            name: fence.fence.name.clone(),
        }
    }
}

/// State published by the evaluation loop after every command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSnapshot {
    pub state: MachineState,
    pub current_geofence: Option<FenceRef>,
    pub today: AttendanceDay,
    pub last_check_at: Option<DateTime<Utc>>,
    pub distance_meters: Option<f64>,
    pub nearest_geofence_id: Option<String>,
    pub suppressed_count: u64,
    /// Commands handled since the monitor was created.
    pub processed: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub is_monitoring: bool,
    pub permission_granted: bool,
    pub online: bool,
    pub state: MachineState,
    pub current_geofence: Option<FenceRef>,
    pub total_geofences: usize,
    pub catalog_generation: u64,
    pub catalog_loaded_at: Option<DateTime<Utc>>,
    pub last_catalog_error: Option<String>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub distance_meters: Option<f64>,
    pub suppressed_count: u64,
    pub today: AttendanceDay,
    pub queue: QueueStats,
}

// ============================================================================
// Monitor
// ============================================================================

struct Running {
    sender: mpsc::Sender<Command>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AttendanceMonitor {
    settings: MonitorSettings,
    deps: MonitorDeps,
    queue: Arc<DurableQueue>,
    connectivity: Arc<Connectivity>,
    catalog: RwLock<GeofenceCatalog>,
    sync_trigger: Arc<Notify>,
    permission_granted: AtomicBool,
    running: Mutex<Option<Running>>,
    snapshot: watch::Sender<LoopSnapshot>,
}

impl AttendanceMonitor {
    pub fn new(
        settings: MonitorSettings,
        deps: MonitorDeps,
        queue: Arc<DurableQueue>,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        let today = deps
            .clock
            .now()
            .with_timezone(&settings.utc_offset)
            .date_naive();
        let (snapshot, _) = watch::channel(LoopSnapshot {
            state: MachineState::Outside,
            current_geofence: None,
            today: AttendanceDay::new(settings.user_id.clone(), today),
            last_check_at: None,
            distance_meters: None,
            nearest_geofence_id: None,
            suppressed_count: 0,
            processed: 0,
        });

        Self {
            settings,
            deps,
            queue,
            connectivity,
            catalog: RwLock::new(GeofenceCatalog::new()),
            sync_trigger: Arc::new(Notify::new()),
            permission_granted: AtomicBool::new(true),
            running: Mutex::new(None),
            snapshot,
        }
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    /// Notified after an append while the remote is believed reachable.
    pub fn sync_trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.sync_trigger)
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopSnapshot> {
        self.snapshot.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Loads the catalog, resumes the persisted day and spawns the
    /// evaluation loop. A failed catalog fetch is not fatal.
    pub async fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }

        if let Err(e) = self.refresh_catalog().await {
            warn!(error = %e, "Initial geofence fetch failed, monitoring with previous catalog");
        }

        let machine = self.restore_machine().await;
        let processed = self.snapshot.borrow().processed;
        self.publish(&machine, processed);

        let (sender, receiver) = mpsc::channel(self.settings.channel_capacity);
        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(machine, receiver, token.clone()));

        *running = Some(Running {
            sender,
            token,
            handle,
        });
        info!(
            user_id = %self.settings.user_id,
            geofences = self.catalog_read().len(),
            "Attendance monitor started"
        );
        Ok(())
    }

    /// Cancels the evaluation loop and in-flight monitor tasks. Unsynced
    /// queue entries stay in the store.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let running = self
            .running
            .lock()
            .await
            .take()
            .ok_or(MonitorError::NotRunning)?;

        running.token.cancel();
        drop(running.sender);
        if let Err(e) = running.handle.await {
            error!(error = %e, "Evaluation loop panicked");
        }
        info!("Attendance monitor stopped");
        Ok(())
    }

    async fn sender(&self) -> Result<mpsc::Sender<Command>, MonitorError> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.sender.clone())
            .ok_or(MonitorError::NotRunning)
    }

    /// Queues a location fix for evaluation.
    pub async fn submit_sample(&self, sample: LocationSample, source: SampleSource) -> Result<(), MonitorError> {
        let input = LocationInput {
            sample,
            source,
            received_at: self.deps.clock.now(),
        };
        self.sender()
            .await?
            .send(Command::Sample(input))
            .await
            .map_err(|_| MonitorError::ChannelClosed)
    }

    pub async fn manual_check_in(&self, punch: ManualPunch) -> Result<AttendanceDay, CommandError> {
        let (reply, response) = oneshot::channel();
        self.sender()
            .await?
            .send(Command::CheckIn { punch, reply })
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;
        Ok(response.await.map_err(|_| MonitorError::ChannelClosed)??)
    }

    pub async fn manual_check_out(&self, punch: ManualPunch) -> Result<AttendanceDay, CommandError> {
        let (reply, response) = oneshot::channel();
        self.sender()
            .await?
            .send(Command::CheckOut { punch, reply })
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;
        Ok(response.await.map_err(|_| MonitorError::ChannelClosed)??)
    }

    /// Reads the location provider once. Used by the polling job.
    pub async fn poll_location(&self) -> Result<(), MonitorError> {
        if !self.permission_granted() {
            debug!("Location permission not granted, skipping poll");
            return Ok(());
        }

        match self.deps.location.current_location().await {
            Ok(sample) => self.submit_sample(sample, SampleSource::Timer).await,
            Err(LocationError::PermissionDenied) => {
                self.set_permission(false);
                Ok(())
            }
            Err(LocationError::Unavailable) => {
                debug!("No location fix available");
                Ok(())
            }
        }
    }

    pub fn permission_granted(&self) -> bool {
        self.permission_granted.load(Ordering::Relaxed)
    }

    /// Records the OS permission state. A denial disables polling until
    /// the bridge reports the permission granted again.
    pub fn set_permission(&self, granted: bool) {
        let previous = self.permission_granted.swap(granted, Ordering::Relaxed);
        match (previous, granted) {
            (true, false) => error!("Location permission denied, location polling disabled"),
            (false, true) => info!("Location permission granted, location polling resumed"),
            _ => {}
        }
    }

    /// Fetches geofences off-lock and applies the result to the catalog.
    pub async fn refresh_catalog(&self) -> Result<CatalogLoad, FetchError> {
        let fetched = tokio::time::timeout(self.settings.remote_timeout, self.deps.remote.fetch_geofences())
            .await
            .unwrap_or(Err(FetchError::Timeout));
        self.connectivity.observe(&fetched);

        let now = self.deps.clock.now();
        let result = self.catalog_write().load(fetched, now);
        match &result {
            Ok(load) => {
                record_catalog_refresh("success");
                if !load.ambiguous.is_empty() {
                    info!(count = load.ambiguous.len(), "Geofences without usable working hours");
                }
            }
            Err(_) => record_catalog_refresh("failure"),
        }
        result
    }

    pub fn today(&self) -> AttendanceDay {
        self.snapshot.borrow().today.clone()
    }

    pub async fn status(&self) -> MonitorStatus {
        let is_monitoring = self.is_running().await;
        let snapshot = self.snapshot.borrow().clone();
        let (total_geofences, catalog_generation, catalog_loaded_at, last_catalog_error) = {
            let catalog = self.catalog_read();
            (
                catalog.len(),
                catalog.generation(),
                catalog.loaded_at(),
                catalog.last_error().map(|e| e.to_string()),
            )
        };
        let queue = self.queue.stats().await;

        MonitorStatus {
            is_monitoring,
            permission_granted: self.permission_granted(),
            online: self.connectivity.is_online(),
            state: snapshot.state,
            current_geofence: snapshot.current_geofence,
            total_geofences,
            catalog_generation,
            catalog_loaded_at,
            last_catalog_error,
            last_check_at: snapshot.last_check_at,
            distance_meters: snapshot.distance_meters,
            suppressed_count: snapshot.suppressed_count,
            today: snapshot.today,
            queue,
        }
    }

    // ========================================================================
    // Evaluation loop
    // ========================================================================

    async fn run(
        self: Arc<Self>,
        mut machine: AttendanceStateMachine,
        mut commands: mpsc::Receiver<Command>,
        token: CancellationToken,
    ) {
        let mut processed = self.snapshot.borrow().processed;

        loop {
            let command = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                Command::Sample(input) => self.handle_sample(&mut machine, input, &token).await,
                Command::CheckIn { punch, reply } => {
                    let result = self
                        .handle_manual(&mut machine, punch, AttendanceEventKind::CheckIn)
                        .await;
                    let _ = reply.send(result);
                }
                Command::CheckOut { punch, reply } => {
                    let result = self
                        .handle_manual(&mut machine, punch, AttendanceEventKind::CheckOut)
                        .await;
                    let _ = reply.send(result);
                }
            }

            processed += 1;
            self.publish(&machine, processed);
        }

        debug!(processed, "Evaluation loop exited");
    }

    async fn handle_sample(
        &self,
        machine: &mut AttendanceStateMachine,
        input: LocationInput,
        token: &CancellationToken,
    ) {
        let LocationInput {
            sample,
            source,
            received_at,
        } = input;

        if let Err(e) = sample.validate() {
            record_sample_rejected("invalid");
            warn!(source = source.as_str(), error = %e, "Dropping invalid location sample");
            return;
        }
        if source == SampleSource::Push {
            self.deps.location.remember(&sample);
        }

        // A polled fix already evaluated is re-evaluated at the poll instant
        // without being recorded again.
        let repeated = source == SampleSource::Timer
            && machine
                .last_observed_at()
                .is_some_and(|last| sample.captured_at <= last);
        let at = if repeated {
            received_at.max(sample.captured_at)
        } else {
            sample.captured_at
        };
        self.roll_over(machine, at).await;

        let mut entries = Vec::new();
        if !repeated {
            entries.push(QueueEntry::new(QueuePayload::Location(
                sample.to_record(source.tracking_type()),
            )));
        }

        if self.local_date(at) < machine.day().date {
            debug!(captured_at = %at, "Sample belongs to a finished day, recording location only");
        } else {
            if let Some(id) = machine.unbound_fence_id().map(str::to_owned) {
                if let Some(fence) = self.catalog_read().get(&id) {
                    machine.bind_checked_in_fence(fence);
                    info!(geofence_id = %id, "Checked-in geofence resolved from catalog");
                }
            }

            let fences = self.catalog_read().fences().to_vec();
            let evaluation = evaluate(&sample, &fences);
            record_sample_evaluated();
            debug!(
                source = source.as_str(),
                contained = ?evaluation.contained_id(),
                distance_meters = ?evaluation.distance_meters,
                repeated,
                lag_ms = (received_at - sample.captured_at).num_milliseconds(),
                "Sample evaluated"
            );

            let device_inside = evaluation.contained.is_some();
            self.snapshot.send_modify(|s| {
                s.distance_meters = evaluation.distance_meters;
                s.nearest_geofence_id = evaluation.nearest_fence_id.clone();
            });

            let step = machine.observe(Observation {
                contained: evaluation.contained,
                sample: sample.clone(),
                at,
            });
            if self.settings.corroborate_with_server && !step.transitions.is_empty() {
                self.corroborate(sample.point(), device_inside, token);
            }
            entries.extend(self.apply_step(machine, step).await);
        }

        self.enqueue(entries).await;
    }

    async fn handle_manual(
        &self,
        machine: &mut AttendanceStateMachine,
        punch: ManualPunch,
        kind: AttendanceEventKind,
    ) -> Result<AttendanceDay, AttendanceError> {
        let at = self.deps.clock.now();
        self.roll_over(machine, at).await;

        let step = match kind {
            AttendanceEventKind::CheckIn => machine.manual_check_in(at, punch.position, punch.notes)?,
            AttendanceEventKind::CheckOut => machine.manual_check_out(at, punch.position, punch.notes)?,
        };
        let entries = self.apply_step(machine, step).await;
        self.enqueue(entries).await;
        Ok(machine.day().clone())
    }

    /// Logs transitions, dispatches notifications and turns events into
    /// queue entries. Persists the day whenever it changed.
    async fn apply_step(&self, machine: &AttendanceStateMachine, step: Step) -> Vec<QueueEntry> {
        let Step {
            transitions,
            events,
            notifications,
            suppressed,
        } = step;

        for change in &transitions {
            info!(
                user_id = %self.settings.user_id,
                from = change.from.as_str(),
                to = change.to.as_str(),
                geofence_id = ?machine.current_fence().map(|f| f.id()),
                "Attendance state changed"
            );
        }
        if let Some(marker) = suppressed {
            record_duplicate_suppressed();
            debug!(state = marker.state.as_str(), reason = ?marker.reason, "Duplicate event suppressed");
        }
        self.dispatch(notifications);

        if events.is_empty() {
            return Vec::new();
        }
        self.persist_day(machine.day()).await;

        events
            .into_iter()
            .map(|event| match event {
                MachineEvent::Attendance(event) => {
                    record_attendance_event(event.kind.as_str());
                    info!(
                        kind = event.kind.as_str(),
                        source = event.punch.source.as_str(),
                        geofence_id = ?event.punch.geofence_id,
                        time = %event.punch.time,
                        "Attendance event recorded"
                    );
                    QueueEntry::new(QueuePayload::Attendance(event))
                }
                MachineEvent::Violation(violation) => {
                    record_attendance_event("violation");
                    warn!(
                        violation_type = violation.violation_type.as_str(),
                        geofence_id = %violation.geofence_id,
                        occurred_at = %violation.occurred_at,
                        "Violation recorded"
                    );
                    QueueEntry::new(QueuePayload::Violation(violation))
                }
            })
            .collect()
    }

    async fn enqueue(&self, entries: Vec<QueueEntry>) {
        if entries.is_empty() {
            return;
        }
        for entry in entries {
            if let Some(overflow) = self.queue.append(entry).await.overflow {
                record_queue_overflow(&overflow);
            }
        }
        record_queue_pending(self.queue.stats().await.unsynced);

        if self.settings.sync_on_append && self.connectivity.is_online() {
            self.sync_trigger.notify_one();
        }
    }

    fn dispatch(&self, notifications: Vec<NotificationTrigger>) {
        if notifications.is_empty() {
            return;
        }
        let notifier = Arc::clone(&self.deps.notifier);
        tokio::spawn(async move {
            for trigger in notifications {
                match notifier.dispatch(&trigger).await {
                    NotificationResult::Sent => record_notification_dispatched(trigger.kind),
                    NotificationResult::Failed(reason) => {
                        warn!(kind = %trigger.kind, reason = %reason, "Notification dispatch failed")
                    }
                    NotificationResult::Skipped => debug!(kind = %trigger.kind, "Notification skipped"),
                }
            }
        });
    }

    /// Asks the remote for its containment verdict. The device decision
    /// stands; disagreements are only logged and counted.
    fn corroborate(&self, point: GeoPoint, device_inside: bool, token: &CancellationToken) {
        let remote = Arc::clone(&self.deps.remote);
        let connectivity = Arc::clone(&self.connectivity);
        let token = token.clone();
        let timeout = self.settings.remote_timeout;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(timeout, remote.check_containment(point)) => {
                    result.unwrap_or(Err(FetchError::Timeout))
                }
            };
            connectivity.observe(&result);

            match result {
                Ok(check) if check.is_inside != device_inside => {
                    record_containment_disagreement();
                    warn!(
                        device_inside,
                        server_inside = check.is_inside,
                        latitude = point.latitude,
                        longitude = point.longitude,
                        "Server disagrees with device containment"
                    );
                }
                Ok(_) => debug!(device_inside, "Server confirmed containment"),
                Err(e) => debug!(error = %e, "Containment corroboration failed"),
            }
        });
    }

    // ========================================================================
    // Day lifecycle
    // ========================================================================

    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.settings.utc_offset).date_naive()
    }

    async fn roll_over(&self, machine: &mut AttendanceStateMachine, at: DateTime<Utc>) {
        let date = self.local_date(at);
        if date <= machine.day().date {
            return;
        }

        let finished = machine.finish_day();
        info!(
            date = %finished.date,
            status = finished.status.as_str(),
            "Attendance day finished"
        );
        *machine = AttendanceStateMachine::new(self.settings.user_id.clone(), date, self.settings.utc_offset);
        self.persist_day(machine.day()).await;
    }

    async fn restore_machine(&self) -> AttendanceStateMachine {
        let user_id = self.settings.user_id.clone();
        let offset = self.settings.utc_offset;
        let today = self.local_date(self.deps.clock.now());

        let persisted = match self.load_day().await {
            Ok(day) => day.filter(|d| d.user_id == user_id),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted attendance day");
                None
            }
        };

        match persisted {
            Some(day) if day.date == today => {
                let fence = day
                    .check_in
                    .as_ref()
                    .and_then(|punch| punch.geofence_id.as_deref())
                    .and_then(|id| self.catalog_read().get(id));
                info!(
                    date = %day.date,
                    status = day.status.as_str(),
                    "Resumed attendance day"
                );
                AttendanceStateMachine::restore(day, offset, fence)
            }
            Some(day) if day.date < today => {
                let finished = AttendanceStateMachine::restore(day, offset, None).finish_day();
                info!(
                    date = %finished.date,
                    status = finished.status.as_str(),
                    "Attendance day from previous run finished"
                );
                let machine = AttendanceStateMachine::new(user_id, today, offset);
                self.persist_day(machine.day()).await;
                machine
            }
            _ => AttendanceStateMachine::new(user_id, today, offset),
        }
    }

    async fn load_day(&self) -> Result<Option<AttendanceDay>, StoreError> {
        match self.deps.store.load(ATTENDANCE_STATE_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    async fn persist_day(&self, day: &AttendanceDay) {
        let encoded = match serde_json::to_string(day) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "Failed to encode attendance day");
                return;
            }
        };
        if let Err(e) = self.deps.store.save(ATTENDANCE_STATE_KEY, &encoded).await {
            warn!(error = %e, "Failed to persist attendance day");
        }
    }

    fn publish(&self, machine: &AttendanceStateMachine, processed: u64) {
        self.snapshot.send_modify(|s| {
            s.state = machine.state();
            s.current_geofence = machine.current_fence().map(|f| FenceRef::from(f.as_ref()));
            s.today = machine.day().clone();
            s.last_check_at = machine.last_observed_at();
            s.suppressed_count = machine.suppressed_count();
            s.processed = processed;
        });
    }

    fn catalog_read(&self) -> RwLockReadGuard<'_, GeofenceCatalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn catalog_write(&self) -> RwLockWriteGuard<'_, GeofenceCatalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use domain::models::{AttendanceStatus, GeofencePayload, PayloadKind, PunchSource};
    use domain::services::{
        FixedClock, MemoryStateStore, MockLocationProvider, MockNotificationDispatcher,
        MockRemoteAuthority, NotificationKind, EARTH_RADIUS_METERS,
    };
    use serde_json::json;

    struct Harness {
        monitor: Arc<AttendanceMonitor>,
        remote: Arc<MockRemoteAuthority>,
        store: Arc<MemoryStateStore>,
        notifier: Arc<MockNotificationDispatcher>,
        location: Arc<MockLocationProvider>,
        clock: Arc<FixedClock>,
    }

    fn office() -> GeofencePayload {
        serde_json::from_value(json!({
            "id": "office",
            "name": "Office",
            "center": { "latitude": 0.0, "longitude": 0.0 },
            "radiusMeters": 100.0,
            "workingHours": { "start": "09:00", "end": "18:00" },
            "alerts": { "onEntry": true, "onExit": true }
        }))
        .unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    fn sample(meters_north: f64, time: DateTime<Utc>) -> LocationSample {
        let latitude = (meters_north / EARTH_RADIUS_METERS).to_degrees();
        LocationSample::new(latitude, 0.0, 5.0, time)
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            user_id: "u1".to_string(),
            utc_offset: FixedOffset::east_opt(0).unwrap(),
            channel_capacity: 16,
            corroborate_with_server: false,
            sync_on_append: true,
            remote_timeout: Duration::from_secs(1),
        }
    }

    async fn harness_with(store: Arc<MemoryStateStore>, now: DateTime<Utc>) -> Harness {
        let remote = Arc::new(MockRemoteAuthority::with_geofences(vec![office()]));
        let notifier = Arc::new(MockNotificationDispatcher::new());
        let location = Arc::new(MockLocationProvider::new());
        let clock = Arc::new(FixedClock::new(now));
        let queue = Arc::new(DurableQueue::open(store.clone(), 100).await);

        let deps = MonitorDeps {
            remote: remote.clone(),
            store: store.clone(),
            notifier: notifier.clone(),
            location: location.clone(),
            clock: clock.clone(),
        };
        let monitor = Arc::new(AttendanceMonitor::new(
            settings(),
            deps,
            queue,
            Arc::new(Connectivity::default()),
        ));

        Harness {
            monitor,
            remote,
            store,
            notifier,
            location,
            clock,
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(MemoryStateStore::new()), at(8, 0)).await
    }

    async fn push(h: &Harness, s: LocationSample) {
        let mut rx = h.monitor.subscribe();
        let target = rx.borrow().processed + 1;
        h.monitor.submit_sample(s, SampleSource::Push).await.unwrap();
        rx.wait_for(|snapshot| snapshot.processed >= target).await.unwrap();
    }

    async fn wait_for_notifications(notifier: &MockNotificationDispatcher, count: usize) {
        for _ in 0..100 {
            if notifier.sent().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn kinds(entries: &[QueueEntry]) -> Vec<PayloadKind> {
        entries.iter().map(|e| e.payload_kind).collect()
    }

    #[tokio::test]
    async fn test_start_loads_catalog() {
        let h = harness().await;
        h.monitor.start().await.unwrap();

        let status = h.monitor.status().await;
        assert!(status.is_monitoring);
        assert_eq!(status.total_geofences, 1);
        assert_eq!(status.catalog_generation, 1);
        assert_eq!(status.state, MachineState::Outside);

        assert!(matches!(h.monitor.start().await, Err(MonitorError::AlreadyRunning)));
        h.monitor.stop().await.unwrap();
        assert!(matches!(h.monitor.stop().await, Err(MonitorError::NotRunning)));
        assert!(!h.monitor.status().await.is_monitoring);
    }

    #[tokio::test]
    async fn test_workday_flow() {
        let h = harness().await;
        h.monitor.start().await.unwrap();

        push(&h, sample(150.0, at(9, 0))).await;
        assert_eq!(h.monitor.status().await.state, MachineState::Outside);

        push(&h, sample(80.0, at(9, 5))).await;
        let status = h.monitor.status().await;
        assert_eq!(status.state, MachineState::CheckedIn);
        assert_eq!(status.current_geofence.unwrap().id, "office");
        assert!(status.today.is_late);
        assert_eq!(status.today.late_by_minutes, 5);

        push(&h, sample(70.0, at(9, 6))).await;
        push(&h, sample(500.0, at(17, 0))).await;

        let today = h.monitor.today();
        assert_eq!(today.status, AttendanceStatus::Completed);
        assert_eq!(today.early_by_minutes, 60);

        let pending = h.monitor.queue().pending().await;
        assert_eq!(
            kinds(&pending),
            vec![
                PayloadKind::Location,
                PayloadKind::Location,
                PayloadKind::CheckIn,
                PayloadKind::Location,
                PayloadKind::Location,
                PayloadKind::CheckOut,
                PayloadKind::Violation,
            ]
        );
        // 09:00 outside and 09:06 still inside.
        assert_eq!(h.monitor.status().await.suppressed_count, 2);

        wait_for_notifications(&h.notifier, 4).await;
        let sent = h.notifier.kinds();
        assert!(sent.contains(&NotificationKind::AutoCheckin));
        assert!(sent.contains(&NotificationKind::AutoCheckout));
        assert!(sent.contains(&NotificationKind::GeofenceViolation));
        assert!(sent.contains(&NotificationKind::GeofenceExit));

        h.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_sample_is_dropped() {
        let h = harness().await;
        h.monitor.start().await.unwrap();

        push(&h, LocationSample::new(95.0, 0.0, 5.0, at(9, 0))).await;
        assert!(h.monitor.queue().pending().await.is_empty());
        assert!(h.monitor.status().await.last_check_at.is_none());
        h.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_actions() {
        let h = harness().await;
        h.monitor.start().await.unwrap();
        h.clock.set(at(10, 0));

        let err = h.monitor.manual_check_out(ManualPunch::default()).await.unwrap_err();
        assert!(matches!(err, CommandError::Attendance(AttendanceError::NotCheckedIn)));

        let day = h.monitor.manual_check_in(ManualPunch::default()).await.unwrap();
        assert_eq!(day.status, AttendanceStatus::CheckedIn);
        assert_eq!(day.check_in.as_ref().unwrap().source, PunchSource::Manual);

        let err = h.monitor.manual_check_in(ManualPunch::default()).await.unwrap_err();
        assert!(matches!(err, CommandError::Attendance(AttendanceError::AlreadyCheckedIn)));

        h.clock.set(at(18, 30));
        let day = h.monitor.manual_check_out(ManualPunch::default()).await.unwrap();
        assert_eq!(day.status, AttendanceStatus::Completed);
        assert_eq!(
            kinds(&h.monitor.queue().pending().await),
            vec![PayloadKind::CheckIn, PayloadKind::CheckOut]
        );
        h.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_require_running_monitor() {
        let h = harness().await;
        let err = h
            .monitor
            .submit_sample(sample(0.0, at(9, 0)), SampleSource::Push)
            .await
            .unwrap_err();
        assert_eq!(err, MonitorError::NotRunning);
        assert!(matches!(
            h.monitor.manual_check_in(ManualPunch::default()).await,
            Err(CommandError::Monitor(MonitorError::NotRunning))
        ));
    }

    #[tokio::test]
    async fn test_restart_resumes_open_day() {
        let store = Arc::new(MemoryStateStore::new());
        let h = harness_with(store.clone(), at(9, 0)).await;
        h.monitor.start().await.unwrap();
        push(&h, sample(10.0, at(9, 1))).await;
        assert_eq!(h.monitor.status().await.state, MachineState::CheckedIn);
        h.monitor.stop().await.unwrap();

        let restarted = harness_with(store, at(11, 0)).await;
        restarted.monitor.start().await.unwrap();
        let status = restarted.monitor.status().await;
        assert_eq!(status.state, MachineState::CheckedIn);
        assert_eq!(status.current_geofence.unwrap().id, "office");
        assert_eq!(status.queue.unsynced, 2);

        // Still inside: no second check-in.
        push(&restarted, sample(20.0, at(11, 1))).await;
        let pending = restarted.monitor.queue().pending().await;
        assert_eq!(
            pending.iter().filter(|e| e.payload_kind == PayloadKind::CheckIn).count(),
            1
        );
        restarted.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_offline_checks_out_after_catalog_reload() {
        let store = Arc::new(MemoryStateStore::new());
        let h = harness_with(store.clone(), at(9, 0)).await;
        h.monitor.start().await.unwrap();
        push(&h, sample(10.0, at(9, 1))).await;
        h.monitor.stop().await.unwrap();

        let restarted = harness_with(store, at(11, 0)).await;
        restarted.remote.set_offline(true);
        restarted.monitor.start().await.unwrap();
        let status = restarted.monitor.status().await;
        assert_eq!(status.state, MachineState::CheckedIn);
        assert_eq!(status.total_geofences, 0);
        assert!(status.current_geofence.is_none());

        restarted.remote.set_offline(false);
        restarted.monitor.refresh_catalog().await.unwrap();
        push(&restarted, sample(500.0, at(11, 5))).await;

        let today = restarted.monitor.today();
        assert_eq!(today.status, AttendanceStatus::Completed);
        assert_eq!(
            today.check_out.as_ref().unwrap().geofence_id.as_deref(),
            Some("office")
        );
        let pending = restarted.monitor.queue().pending().await;
        assert_eq!(
            pending.iter().filter(|e| e.payload_kind == PayloadKind::CheckOut).count(),
            1
        );
        assert_eq!(
            pending.iter().filter(|e| e.payload_kind == PayloadKind::Violation).count(),
            1
        );
        restarted.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_poll_fix_is_evaluated_but_not_recorded() {
        let h = harness().await;
        h.monitor.start().await.unwrap();

        let fix = sample(10.0, at(8, 50));
        push(&h, fix.clone()).await;
        assert_eq!(h.monitor.status().await.state, MachineState::InsideOutsideHours);

        // Standing still while working hours begin.
        h.location.set_sample(fix);
        h.clock.set(at(9, 5));
        let mut rx = h.monitor.subscribe();
        let target = rx.borrow().processed + 1;
        h.monitor.poll_location().await.unwrap();
        rx.wait_for(|s| s.processed >= target).await.unwrap();

        let today = h.monitor.today();
        assert_eq!(today.status, AttendanceStatus::CheckedIn);
        assert_eq!(today.late_by_minutes, 5);

        h.clock.set(at(9, 10));
        let target = rx.borrow().processed + 1;
        h.monitor.poll_location().await.unwrap();
        rx.wait_for(|s| s.processed >= target).await.unwrap();

        assert_eq!(
            kinds(&h.monitor.queue().pending().await),
            vec![PayloadKind::Location, PayloadKind::CheckIn]
        );
        h.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_day_rollover_marks_absent_and_resets() {
        let h = harness().await;
        h.monitor.start().await.unwrap();

        push(&h, sample(500.0, at(10, 0))).await;
        let next_day = at(9, 30) + ChronoDuration::days(1);
        push(&h, sample(10.0, next_day)).await;

        let today = h.monitor.today();
        assert_eq!(today.date, next_day.date_naive());
        assert_eq!(today.status, AttendanceStatus::CheckedIn);

        let raw = h.store.load(ATTENDANCE_STATE_KEY).await.unwrap().unwrap();
        let persisted: AttendanceDay = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.date, next_day.date_naive());
        h.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_respects_permission() {
        let h = harness().await;
        h.monitor.start().await.unwrap();

        h.location.set_error(LocationError::PermissionDenied);
        h.monitor.poll_location().await.unwrap();
        assert!(!h.monitor.permission_granted());

        h.location.set_sample(sample(10.0, at(9, 30)));
        h.monitor.poll_location().await.unwrap();
        assert!(h.monitor.queue().pending().await.is_empty());

        h.monitor.set_permission(true);
        let mut rx = h.monitor.subscribe();
        h.monitor.poll_location().await.unwrap();
        rx.wait_for(|s| s.processed >= 1).await.unwrap();
        assert_eq!(h.monitor.status().await.state, MachineState::CheckedIn);
        h.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_catalog_refresh_failure_keeps_fences() {
        let h = harness().await;
        h.monitor.start().await.unwrap();

        h.remote.set_offline(true);
        assert!(h.monitor.refresh_catalog().await.is_err());

        let status = h.monitor.status().await;
        assert_eq!(status.total_geofences, 1);
        assert_eq!(status.catalog_generation, 1);
        assert!(status.last_catalog_error.is_some());
        assert!(!status.online);
        h.monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_trigger_fires_on_append_while_online() {
        let h = harness().await;
        h.monitor.start().await.unwrap();
        let trigger = h.monitor.sync_trigger();

        push(&h, sample(500.0, at(9, 0))).await;
        tokio::time::timeout(Duration::from_millis(200), trigger.notified())
            .await
            .unwrap();
        h.monitor.stop().await.unwrap();
    }
}
