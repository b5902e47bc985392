//! Last-known-location provider for the polling path.
//!
//! The OS bridge pushes fixes over HTTP; between pushes the poll job
//! re-reads the most recent fix so working hours that begin while the
//! user stands still are still noticed.

use std::sync::{Arc, RwLock};

use chrono::Duration;

use domain::errors::LocationError;
use domain::models::LocationSample;
use domain::services::{Clock, LocationProvider};

pub struct LastKnownLocation {
    last: RwLock<Option<LocationSample>>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl LastKnownLocation {
    pub fn new(clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            last: RwLock::new(None),
            max_age,
            clock,
        }
    }
}

#[async_trait::async_trait]
impl LocationProvider for LastKnownLocation {
    /// Returns the last fix as captured, or `Unavailable` when there is none
    /// or it is older than `max_age`.
    async fn current_location(&self) -> Result<LocationSample, LocationError> {
        let last = match self.last.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let now = self.clock.now();

        match last {
            Some(sample) if now - sample.captured_at <= self.max_age => Ok(sample),
            _ => Err(LocationError::Unavailable),
        }
    }

    fn remember(&self, sample: &LocationSample) {
        let mut guard = match self.last.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard
            .as_ref()
            .map_or(true, |current| sample.captured_at >= current.captured_at)
        {
            *guard = Some(sample.clone());
        }
    }
}
