//! Offline queue sync job.

use std::sync::Arc;

use tokio::sync::Notify;

use super::scheduler::{Job, JobFrequency};
use crate::services::SyncWorker;

/// Runs a sync cycle periodically and whenever the monitor signals an
/// append while online.
pub struct SyncJob {
    worker: Arc<SyncWorker>,
    trigger: Arc<Notify>,
    interval_secs: u64,
}

impl SyncJob {
    pub fn new(worker: Arc<SyncWorker>, trigger: Arc<Notify>, interval_secs: u64) -> Self {
        Self {
            worker,
            trigger,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for SyncJob {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    fn trigger(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.trigger))
    }

    async fn execute(&self) -> Result<(), String> {
        let report = self.worker.sync_once().await;
        if report.failed > 0 {
            return Err(format!("{} entries left unsynced", report.failed));
        }
        Ok(())
    }
}
