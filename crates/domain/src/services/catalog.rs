//! Geofence catalog.
//!
//! Holds the set of active geofences with their resolved working hours. A
//! failed fetch keeps the previous catalog (stale but available).

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::{FetchError, ScheduleError};
use crate::models::{Geofence, GeofencePayload, ResolvedFence, ShiftWindow};

/// Outcome of applying a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLoad {
    pub accepted: usize,
    pub rejected: usize,
    /// Fences that can never trigger an auto check-in.
    pub ambiguous: Vec<ScheduleError>,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct GeofenceCatalog {
    fences: Vec<Arc<ResolvedFence>>,
    loaded_at: Option<DateTime<Utc>>,
    last_error: Option<FetchError>,
    generation: u64,
}

impl GeofenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the result of a fetch.
    ///
    /// On success the catalog is replaced and the generation bumped. On
    /// failure the previous fences, `loaded_at` and generation are kept and
    /// the error is recorded and returned.
    pub fn load(
        &mut self,
        fetched: Result<Vec<GeofencePayload>, FetchError>,
        at: DateTime<Utc>,
    ) -> Result<CatalogLoad, FetchError> {
        let payloads = match fetched {
            Ok(payloads) => payloads,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retained = self.fences.len(),
                    "Geofence fetch failed, keeping previous catalog"
                );
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };

        let mut fences = Vec::with_capacity(payloads.len());
        let mut rejected = 0;
        let mut ambiguous = Vec::new();

        for payload in payloads {
            match Geofence::try_from(payload) {
                Ok(fence) => {
                    let resolved = ResolvedFence::new(fence);
                    if resolved.hours.is_empty() {
                        let err = ScheduleError::ScheduleAmbiguous {
                            geofence_id: resolved.fence.id.clone(),
                        };
                        tracing::warn!(
                            geofence_id = %resolved.fence.id,
                            error = %err,
                            "Geofence will never trigger auto check-in"
                        );
                        ambiguous.push(err);
                    }
                    fences.push(Arc::new(resolved));
                }
                Err(reason) => {
                    rejected += 1;
                    tracing::warn!(reason = %reason, "Rejected geofence");
                }
            }
        }

        fences.sort_by(|a, b| a.fence.id.cmp(&b.fence.id));

        self.fences = fences;
        self.loaded_at = Some(at);
        self.last_error = None;
        self.generation += 1;

        tracing::info!(
            accepted = self.fences.len(),
            rejected,
            generation = self.generation,
            "Geofence catalog loaded"
        );

        Ok(CatalogLoad {
            accepted: self.fences.len(),
            rejected,
            ambiguous,
            generation: self.generation,
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<ResolvedFence>> {
        self.fences.iter().find(|f| f.fence.id == id).cloned()
    }

    pub fn fences(&self) -> &[Arc<ResolvedFence>] {
        &self.fences
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }

    /// Working window for `fence` on `local_date`, if any.
    pub fn working_hours_for(&self, fence: &ResolvedFence, local_date: NaiveDate) -> Option<ShiftWindow> {
        fence.hours.for_date(local_date)
    }
}
