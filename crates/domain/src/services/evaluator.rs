//! Geofence containment evaluation.
//!
//! Pure and stateless: identical inputs always produce identical output.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::models::{GeoPoint, LocationSample, ResolvedFence};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two points using the haversine formula.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Result of evaluating one sample against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The active fence: the smallest containing fence, ties broken by id.
    pub contained: Option<Arc<ResolvedFence>>,
    /// Distance to the contained fence, or to the nearest fence when none
    /// contains the sample. `None` for an empty catalog.
    pub distance_meters: Option<f64>,
    pub nearest_fence_id: Option<String>,
}

impl Evaluation {
    pub fn contained_id(&self) -> Option<&str> {
        self.contained.as_deref().map(ResolvedFence::id)
    }
}

/// Evaluates `sample` against `fences`.
pub fn evaluate(sample: &LocationSample, fences: &[Arc<ResolvedFence>]) -> Evaluation {
    let point = sample.point();

    let mut contained: Option<(&Arc<ResolvedFence>, f64)> = None;
    let mut nearest: Option<(&Arc<ResolvedFence>, f64)> = None;

    for fence in fences {
        let distance = haversine_distance(point, fence.fence.center);

        if nearest.map_or(true, |(current, d)| {
            distance
                .total_cmp(&d)
                .then_with(|| fence.id().cmp(current.id()))
                == Ordering::Less
        }) {
            nearest = Some((fence, distance));
        }

        if distance <= fence.fence.radius_meters
            && contained.map_or(true, |(current, _)| precedes(fence, current))
        {
            contained = Some((fence, distance));
        }
    }

    match contained {
        Some((fence, distance)) => Evaluation {
            contained: Some(Arc::clone(fence)),
            distance_meters: Some(distance),
            nearest_fence_id: nearest.map(|(f, _)| f.id().to_string()),
        },
        None => Evaluation {
            contained: None,
            distance_meters: nearest.map(|(_, d)| d),
            nearest_fence_id: nearest.map(|(f, _)| f.id().to_string()),
        },
    }
}

/// Ordering among containing fences: ascending radius, then ascending id.
fn precedes(candidate: &ResolvedFence, current: &ResolvedFence) -> bool {
    candidate
        .fence
        .radius_meters
        .total_cmp(&current.fence.radius_meters)
        .then_with(|| candidate.id().cmp(current.id()))
        == Ordering::Less
}
