//! Geofence domain model.
//!
//! Geofences are defined by administrators on the remote authority and are
//! never created or mutated on-device. The wire shape is tolerant of the
//! several encodings the server has used over time; [`Geofence`] is the
//! normalized form the rest of the engine works with.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::location::GeoPoint;

/// Normalized geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: String,
    pub name: String,
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub working_hours: Option<WorkingHours>,
    pub alerts: GeofenceAlerts,
    pub active: bool,
}

/// Which transitions should raise user-facing alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceAlerts {
    #[serde(default, alias = "entryAlert")]
    pub on_entry: bool,
    #[serde(default, alias = "exitAlert")]
    pub on_exit: bool,
}

/// A daily working window. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftWindow {
    #[serde(with = "shared::time::hhmm")]
    pub start: NaiveTime,
    #[serde(with = "shared::time::hhmm")]
    pub end: NaiveTime,
}

impl ShiftWindow {
    /// Builds a window, rejecting windows whose end is not after the start.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Parses a window from clock strings.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start = shared::time::parse_clock_time(start).ok()?;
        let end = shared::time::parse_clock_time(end).ok()?;
        Self::new(start, end)
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// One entry of a per-weekday schedule. `window` is `None` for a weekday
/// the schedule explicitly switches off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub day: Weekday,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<ShiftWindow>,
}

/// Working hours in one of the two shapes the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkingHours {
    /// Per-weekday schedule; entries keep server order.
    Weekly { schedule: Vec<DaySchedule> },
    /// Legacy flat window applied to every day.
    Flat { window: ShiftWindow },
}

/// Seven-slot table of working windows, Monday first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeeklyHours([Option<ShiftWindow>; 7]);

impl WeeklyHours {
    /// Resolves working hours into one window per weekday.
    ///
    /// A weekly schedule uses the entry for the weekday. A weekday switched
    /// off has no window; a weekday absent from the schedule falls back to
    /// the first entry with a window. A flat window applies to every day.
    pub fn resolve(hours: Option<&WorkingHours>) -> Self {
        let mut slots = [None; 7];
        match hours {
            Some(WorkingHours::Weekly { schedule }) => {
                let fallback = schedule.iter().find_map(|entry| entry.window);
                for (idx, slot) in slots.iter_mut().enumerate() {
                    *slot = match schedule
                        .iter()
                        .find(|entry| entry.day.num_days_from_monday() as usize == idx)
                    {
                        Some(entry) => entry.window,
                        None => fallback,
                    };
                }
            }
            Some(WorkingHours::Flat { window }) => slots = [Some(*window); 7],
            None => {}
        }
        Self(slots)
    }

    pub fn for_weekday(&self, weekday: Weekday) -> Option<ShiftWindow> {
        self.0[weekday.num_days_from_monday() as usize]
    }

    pub fn for_date(&self, date: NaiveDate) -> Option<ShiftWindow> {
        self.for_weekday(date.weekday())
    }

    /// True when no weekday has a usable window.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

/// A geofence together with its resolved weekly hours.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFence {
    pub fence: Geofence,
    pub hours: WeeklyHours,
}

impl ResolvedFence {
    pub fn new(fence: Geofence) -> Self {
        let hours = WeeklyHours::resolve(fence.working_hours.as_ref());
        Self { fence, hours }
    }

    pub fn id(&self) -> &str {
        &self.fence.id
    }

    /// True when `local` falls inside the window for its own date.
    pub fn within_hours(&self, local: NaiveDateTime) -> bool {
        self.hours
            .for_date(local.date())
            .map(|window| window.contains(local.time()))
            .unwrap_or(false)
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Reasons a fetched geofence is rejected at load time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeofenceRejection {
    #[error("Geofence {0} is inactive")]
    Inactive(String),

    #[error("Geofence {id} has invalid radius {radius}")]
    InvalidRadius { id: String, radius: f64 },

    #[error("Geofence {0} has an out-of-range center")]
    InvalidCenter(String),
}

fn default_active() -> bool {
    true
}

fn default_day_enabled() -> bool {
    true
}

/// Geofence as returned by `GET /geofences`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofencePayload {
    #[serde(alias = "_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub center: CenterPayload,

    #[serde(alias = "radius")]
    pub radius_meters: f64,

    #[serde(default)]
    pub working_hours: Option<WorkingHoursPayload>,

    #[serde(default)]
    pub alerts: GeofenceAlerts,

    #[serde(default = "default_active", alias = "isActive")]
    pub active: bool,
}

/// Center as either a plain point or a GeoJSON point (`[lon, lat]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CenterPayload {
    Point { latitude: f64, longitude: f64 },
    GeoJson { coordinates: [f64; 2] },
}

impl CenterPayload {
    pub fn to_point(&self) -> GeoPoint {
        match self {
            CenterPayload::Point { latitude, longitude } => GeoPoint {
                latitude: *latitude,
                longitude: *longitude,
            },
            CenterPayload::GeoJson { coordinates } => GeoPoint {
                latitude: coordinates[1],
                longitude: coordinates[0],
            },
        }
    }
}

/// Raw working hours, covering both the weekly and the legacy flat shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHoursPayload {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub schedule: Option<SchedulePayload>,

    #[serde(default, alias = "startTime")]
    pub start: Option<String>,

    #[serde(default, alias = "endTime")]
    pub end: Option<String>,
}

/// Weekly schedule as a list of `{day, startTime, endTime}` or keyed by day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchedulePayload {
    List(Vec<DaySchedulePayload>),
    ByDay(BTreeMap<String, DaySchedulePayload>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedulePayload {
    #[serde(default)]
    pub day: String,

    #[serde(default, alias = "start")]
    pub start_time: Option<String>,

    #[serde(default, alias = "end")]
    pub end_time: Option<String>,

    #[serde(default = "default_day_enabled")]
    pub enabled: bool,
}

impl DaySchedulePayload {
    /// A disabled day is kept without a window. An enabled day without a
    /// usable window is dropped, as is an unknown day name.
    fn to_schedule(&self) -> Option<DaySchedule> {
        let day = self.day.trim().parse::<Weekday>().ok()?;
        if !self.enabled {
            return Some(DaySchedule { day, window: None });
        }
        let window = ShiftWindow::parse(self.start_time.as_deref()?, self.end_time.as_deref()?)?;
        Some(DaySchedule {
            day,
            window: Some(window),
        })
    }
}

impl WorkingHoursPayload {
    /// Normalizes into a [`WorkingHours`] shape.
    ///
    /// An enabled weekly schedule with at least one usable window wins.
    /// Otherwise a usable flat window is used. Entries with unparseable
    /// times or an end not after the start are discarded. Keyed schedules
    /// are ordered Monday first; lists keep server order.
    pub fn normalize(&self) -> Option<WorkingHours> {
        if self.enabled {
            let schedule: Vec<DaySchedule> = match &self.schedule {
                Some(SchedulePayload::List(entries)) => {
                    entries.iter().filter_map(DaySchedulePayload::to_schedule).collect()
                }
                Some(SchedulePayload::ByDay(entries)) => {
                    let mut schedule: Vec<DaySchedule> = entries
                        .iter()
                        .filter_map(|(day, entry)| {
                            DaySchedulePayload {
                                day: day.clone(),
                                ..entry.clone()
                            }
                            .to_schedule()
                        })
                        .collect();
                    schedule.sort_by_key(|entry| entry.day.num_days_from_monday());
                    schedule
                }
                None => Vec::new(),
            };
            if schedule.iter().any(|entry| entry.window.is_some()) {
                return Some(WorkingHours::Weekly { schedule });
            }
        }

        let window = ShiftWindow::parse(self.start.as_deref()?, self.end.as_deref()?)?;
        Some(WorkingHours::Flat { window })
    }
}

impl TryFrom<GeofencePayload> for Geofence {
    type Error = GeofenceRejection;

    fn try_from(payload: GeofencePayload) -> Result<Self, Self::Error> {
        if !payload.active {
            return Err(GeofenceRejection::Inactive(payload.id));
        }
        if shared::validation::validate_radius(payload.radius_meters).is_err() {
            return Err(GeofenceRejection::InvalidRadius {
                id: payload.id,
                radius: payload.radius_meters,
            });
        }
        let center = payload.center.to_point();
        if shared::validation::validate_latitude(center.latitude).is_err()
            || shared::validation::validate_longitude(center.longitude).is_err()
        {
            return Err(GeofenceRejection::InvalidCenter(payload.id));
        }

        let working_hours = payload.working_hours.as_ref().and_then(WorkingHoursPayload::normalize);

        Ok(Geofence {
            id: payload.id,
            name: payload.name,
            center,
            radius_meters: payload.radius_meters,
            working_hours,
            alerts: payload.alerts,
            active: true,
        })
    }
}
