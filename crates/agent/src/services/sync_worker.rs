//! Sync worker: drains the offline queue to the remote authority.
//!
//! Pending entries are sent in fixed-size batches. Inside a batch,
//! consecutive location and violation entries share one
//! `POST /location/batch` call while check-in and check-out entries go to
//! their attendance endpoints, preserving queue order. The first failure
//! ends the cycle; whatever was delivered before it stays synced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use domain::errors::FetchError;
use domain::models::{AttendanceEventKind, QueueEntry, QueuePayload};
use domain::services::{
    AttendanceSubmission, DurableQueue, LocationBatchItem, RemoteAuthority, SubmitOutcome,
};

use crate::middleware::metrics::{record_queue_pending, record_sync_entries};

/// Belief about whether the remote authority is reachable.
#[derive(Debug)]
pub struct Connectivity {
    online: AtomicBool,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn mark_online(&self) {
        if !self.online.swap(true, Ordering::Relaxed) {
            info!("Remote authority reachable");
        }
    }

    pub fn mark_offline(&self) {
        if self.online.swap(false, Ordering::Relaxed) {
            warn!("Remote authority unreachable, working offline");
        }
    }

    /// Updates the belief from the outcome of a remote call.
    pub fn observe<T>(&self, result: &Result<T, FetchError>) {
        match result {
            Ok(_) => self.mark_online(),
            Err(_) => self.mark_offline(),
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Outcome of one sync cycle, counted in queue entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Another cycle was already running.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Result of submitting one batch.
struct BatchOutcome {
    delivered: Vec<Uuid>,
    error: Option<FetchError>,
}

pub struct SyncWorker {
    queue: Arc<DurableQueue>,
    remote: Arc<dyn RemoteAuthority>,
    connectivity: Arc<Connectivity>,
    batch_size: usize,
    retain_synced: bool,
    running: Mutex<()>,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<DurableQueue>,
        remote: Arc<dyn RemoteAuthority>,
        connectivity: Arc<Connectivity>,
        batch_size: usize,
        retain_synced: bool,
    ) -> Self {
        Self {
            queue,
            remote,
            connectivity,
            batch_size: batch_size.max(1),
            retain_synced,
            running: Mutex::new(()),
        }
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    /// Runs one sync cycle. Returns a skipped report if a cycle is in progress.
    pub async fn sync_once(&self) -> SyncReport {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Sync cycle already running, skipping trigger");
            return SyncReport::skipped();
        };

        let pending = self.queue.pending().await;
        let mut report = SyncReport::default();
        if pending.is_empty() {
            return report;
        }

        for (index, batch) in pending.chunks(self.batch_size).enumerate() {
            report.attempted += batch.len();
            let outcome = self.submit_batch(batch).await;

            if !outcome.delivered.is_empty() {
                self.queue.mark_synced(&outcome.delivered).await;
                report.succeeded += outcome.delivered.len();
            }

            if let Some(e) = outcome.error {
                report.failed += batch.len() - outcome.delivered.len();
                self.connectivity.mark_offline();
                warn!(
                    batch = index + 1,
                    error = %e,
                    kind = e.kind(),
                    delivered = report.succeeded,
                    "Sync batch failed, ending cycle"
                );
                break;
            }
            self.connectivity.mark_online();
        }

        if !self.retain_synced && report.succeeded > 0 {
            let purged = self.queue.purge_synced().await;
            debug!(purged, "Purged synced entries");
        }

        record_sync_entries("succeeded", report.succeeded);
        record_sync_entries("failed", report.failed);
        record_queue_pending(self.queue.stats().await.unsynced);

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Sync cycle finished"
        );
        report
    }

    async fn submit_batch(&self, batch: &[QueueEntry]) -> BatchOutcome {
        let mut delivered = Vec::with_capacity(batch.len());
        let mut run: Vec<(Uuid, LocationBatchItem)> = Vec::new();

        for entry in batch {
            match &entry.payload {
                QueuePayload::Location(record) => run.push((entry.id, record.into())),
                QueuePayload::Violation(violation) => run.push((entry.id, violation.into())),
                QueuePayload::Attendance(event) => {
                    if let Err(e) = self.flush_run(&mut run, &mut delivered).await {
                        return BatchOutcome {
                            delivered,
                            error: Some(e),
                        };
                    }

                    let submission = AttendanceSubmission::from(event);
                    let result = match event.kind {
                        AttendanceEventKind::CheckIn => self.remote.submit_check_in(&submission).await,
                        AttendanceEventKind::CheckOut => self.remote.submit_check_out(&submission).await,
                    };
                    match result {
                        Ok(outcome) => {
                            if outcome == SubmitOutcome::AlreadyRecorded {
                                debug!(entry_id = %entry.id, kind = event.kind.as_str(), "Attendance event already recorded remotely");
                            }
                            delivered.push(entry.id);
                        }
                        Err(e) => {
                            return BatchOutcome {
                                delivered,
                                error: Some(e),
                            }
                        }
                    }
                }
            }
        }

        let error = self.flush_run(&mut run, &mut delivered).await.err();
        BatchOutcome { delivered, error }
    }

    async fn flush_run(
        &self,
        run: &mut Vec<(Uuid, LocationBatchItem)>,
        delivered: &mut Vec<Uuid>,
    ) -> Result<(), FetchError> {
        if run.is_empty() {
            return Ok(());
        }
        let (ids, items): (Vec<Uuid>, Vec<LocationBatchItem>) = std::mem::take(run).into_iter().unzip();
        self.remote.submit_location_batch(&items).await?;
        delivered.extend(ids);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use domain::models::{
        AttendanceEvent, AttendancePunch, LocationRecord, PunchSource, TrackingType,
    };
    use domain::services::{MemoryStateStore, MockRemoteAuthority, RemoteCall};

    fn location(minute: i64) -> QueueEntry {
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        QueueEntry::new(QueuePayload::Location(LocationRecord {
            latitude: 48.1,
            longitude: 17.1,
            accuracy: 10.0,
            altitude: None,
            speed: None,
            heading: None,
            timestamp: base + Duration::minutes(minute),
            tracking_type: TrackingType::Foreground,
        }))
    }

    fn check_in(minute: i64) -> QueueEntry {
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        QueueEntry::new(QueuePayload::Attendance(AttendanceEvent {
            user_id: "u1".to_string(),
            date: base.date_naive(),
            kind: AttendanceEventKind::CheckIn,
            punch: AttendancePunch {
                time: base + Duration::minutes(minute),
                geofence_id: Some("f1".to_string()),
                source: PunchSource::Auto,
            },
            latitude: Some(48.1),
            longitude: Some(17.1),
            accuracy: Some(10.0),
            notes: "Auto check-in at Office".to_string(),
        }))
    }

    async fn worker(
        remote: Arc<MockRemoteAuthority>,
        entries: Vec<QueueEntry>,
        batch_size: usize,
        retain: bool,
    ) -> (SyncWorker, Arc<DurableQueue>) {
        let queue = Arc::new(DurableQueue::open(Arc::new(MemoryStateStore::new()), 100).await);
        for entry in entries {
            queue.append(entry).await;
        }
        let worker = SyncWorker::new(
            Arc::clone(&queue),
            remote,
            Arc::new(Connectivity::default()),
            batch_size,
            retain,
        );
        (worker, queue)
    }

    #[tokio::test]
    async fn test_sync_all_batches() {
        let remote = Arc::new(MockRemoteAuthority::new());
        let (worker, queue) = worker(Arc::clone(&remote), (0..5).map(location).collect(), 2, true).await;

        let report = worker.sync_once().await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 5);
        assert_eq!(report.failed, 0);
        assert_eq!(remote.batches().len(), 3);
        assert_eq!(queue.stats().await.synced, 5);
        assert!(worker.connectivity().is_online());
    }

    #[tokio::test]
    async fn test_sync_fail_fast() {
        let remote = Arc::new(MockRemoteAuthority::new());
        remote.fail_submission(2);
        let (worker, queue) = worker(Arc::clone(&remote), (0..6).map(location).collect(), 2, true).await;

        let report = worker.sync_once().await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        // Third batch never attempted.
        assert_eq!(remote.batches().len(), 2);
        let stats = queue.stats().await;
        assert_eq!(stats.synced, 2);
        assert_eq!(stats.unsynced, 4);
        assert!(!worker.connectivity().is_online());

        let pending = queue.pending().await;
        let first_batch = &remote.batches()[0];
        assert!(pending
            .iter()
            .all(|e| !first_batch.iter().any(|item| item.timestamp == e.captured_at)));
    }

    #[tokio::test]
    async fn test_attendance_routed_to_own_endpoint_in_order() {
        let remote = Arc::new(MockRemoteAuthority::new());
        let entries = vec![location(0), location(1), check_in(2), location(3)];
        let (worker, _queue) = worker(Arc::clone(&remote), entries, 50, true).await;

        let report = worker.sync_once().await;
        assert_eq!(report.succeeded, 4);

        let calls = remote.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[0], RemoteCall::LocationBatch(items) if items.len() == 2));
        assert!(matches!(&calls[1], RemoteCall::CheckIn(_)));
        assert!(matches!(&calls[2], RemoteCall::LocationBatch(items) if items.len() == 1));
    }

    #[tokio::test]
    async fn test_conflict_counts_as_delivered() {
        let remote = Arc::new(MockRemoteAuthority::new());
        remote.set_conflict_on_attendance(true);
        let (worker, queue) = worker(Arc::clone(&remote), vec![check_in(0)], 50, true).await;

        let report = worker.sync_once().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(queue.stats().await.unsynced, 0);
    }

    #[tokio::test]
    async fn test_partial_batch_keeps_delivered_entries() {
        let remote = Arc::new(MockRemoteAuthority::new());
        remote.fail_submission(2);
        let entries = vec![location(0), check_in(1), location(2)];
        let (worker, queue) = worker(Arc::clone(&remote), entries, 50, true).await;

        let report = worker.sync_once().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(queue.pending().await.len(), 2);
    }

    #[tokio::test]
    async fn test_purge_when_not_retaining() {
        let remote = Arc::new(MockRemoteAuthority::new());
        let (worker, queue) = worker(Arc::clone(&remote), (0..3).map(location).collect(), 50, false).await;

        worker.sync_once().await;
        assert_eq!(queue.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_calls() {
        let remote = Arc::new(MockRemoteAuthority::new());
        let (worker, _queue) = worker(Arc::clone(&remote), Vec::new(), 50, true).await;

        assert_eq!(worker.sync_once().await, SyncReport::default());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_skipped() {
        let remote = Arc::new(MockRemoteAuthority::new());
        let (worker, _queue) = worker(remote, vec![location(0)], 50, true).await;

        let _held = worker.running.lock().await;
        assert!(worker.sync_once().await.skipped);
    }

    #[test]
    fn test_connectivity_observe() {
        let connectivity = Connectivity::default();
        connectivity.observe::<()>(&Err(FetchError::Timeout));
        assert!(!connectivity.is_online());
        connectivity.observe(&Ok(()));
        assert!(connectivity.is_online());
    }
}
