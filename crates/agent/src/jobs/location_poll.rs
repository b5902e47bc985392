//! Timer-driven location polling job.

use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};
use crate::services::AttendanceMonitor;

/// Reads the location provider and feeds the evaluation loop.
pub struct LocationPollJob {
    monitor: Arc<AttendanceMonitor>,
    interval_secs: u64,
}

impl LocationPollJob {
    pub fn new(monitor: Arc<AttendanceMonitor>, interval_secs: u64) -> Self {
        Self {
            monitor,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for LocationPollJob {
    fn name(&self) -> &'static str {
        "location_poll"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        if !self.monitor.is_running().await {
            return Ok(());
        }
        self.monitor.poll_location().await.map_err(|e| e.to_string())
    }
}
