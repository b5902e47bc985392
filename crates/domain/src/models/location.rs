//! Location domain model.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A single position fix produced by the device location provider.
///
/// Samples are immutable once created. Invalid samples are dropped before
/// they reach the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,

    #[validate(custom(function = "shared::validation::validate_accuracy"))]
    pub accuracy_meters: f64,

    pub altitude_meters: Option<f64>,

    #[validate(custom(function = "shared::validation::validate_speed"))]
    pub speed_mps: Option<f64>,

    #[validate(custom(function = "shared::validation::validate_bearing"))]
    pub heading_deg: Option<f64>,

    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    /// Creates a sample with only the mandatory fields set.
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            altitude_meters: None,
            speed_mps: None,
            heading_deg: None,
            captured_at,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Converts the sample into the record shape sent to the remote authority.
    pub fn to_record(&self, tracking_type: TrackingType) -> LocationRecord {
        LocationRecord {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy_meters,
            altitude: self.altitude_meters,
            speed: self.speed_mps,
            heading: self.heading_deg,
            timestamp: self.captured_at,
            tracking_type,
        }
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// How a location record was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingType {
    /// Delivered by the OS location bridge.
    Background,
    /// Polled by the agent's own timer.
    Foreground,
}

impl TrackingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingType::Background => "background",
            TrackingType::Foreground => "foreground",
        }
    }
}

/// Location payload stored in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub tracking_type: TrackingType,
}

/// Request payload for pushing a location fix from the OS bridge.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    /// Timestamp in milliseconds since epoch
    #[validate(custom(function = "shared::validation::validate_timestamp"))]
    pub timestamp: i64,

    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,

    #[validate(custom(function = "shared::validation::validate_accuracy"))]
    pub accuracy: f64,

    pub altitude: Option<f64>,

    #[validate(custom(function = "shared::validation::validate_bearing"))]
    pub heading: Option<f64>,

    #[validate(custom(function = "shared::validation::validate_speed"))]
    pub speed: Option<f64>,
}

impl LocationFix {
    /// Converts a validated fix into a sample. Returns `None` when the
    /// timestamp cannot be represented.
    pub fn into_sample(self) -> Option<LocationSample> {
        let captured_at = Utc.timestamp_millis_opt(self.timestamp).single()?;
        Some(LocationSample {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_meters: self.accuracy,
            altitude_meters: self.altitude,
            speed_mps: self.speed,
            heading_deg: self.heading,
            captured_at,
        })
    }
}

/// Request payload for pushing several fixes at once.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocationFixBatch {
    #[validate(length(min = 1, max = 50, message = "Batch must contain 1-50 locations"))]
    #[validate(nested)]
    pub locations: Vec<LocationFix>,
}
