//! Geofence catalog refresh job.

use std::sync::Arc;

use tracing::debug;

use super::scheduler::{Job, JobFrequency};
use crate::services::AttendanceMonitor;

/// Reloads the geofence catalog on its own cadence, independent of
/// evaluation. A failed fetch keeps the previous catalog.
pub struct CatalogRefreshJob {
    monitor: Arc<AttendanceMonitor>,
    interval_secs: u64,
}

impl CatalogRefreshJob {
    pub fn new(monitor: Arc<AttendanceMonitor>, interval_secs: u64) -> Self {
        Self {
            monitor,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for CatalogRefreshJob {
    fn name(&self) -> &'static str {
        "catalog_refresh"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        if !self.monitor.is_running().await {
            return Ok(());
        }
        let load = self.monitor.refresh_catalog().await.map_err(|e| e.to_string())?;
        debug!(
            accepted = load.accepted,
            rejected = load.rejected,
            generation = load.generation,
            "Catalog refreshed"
        );
        Ok(())
    }
}
