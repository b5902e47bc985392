//! Validators for location fixes and geofence geometry.
//!
//! Used through `#[validate(custom(...))]` on request payloads and samples,
//! and directly when geofences are loaded into the catalog.

use chrono::{DateTime, Duration, TimeZone, Utc};
use validator::ValidationError;

/// Oldest fix the OS bridge may deliver from its offline buffer. Covers a
/// full previous local day in any UTC offset.
pub const MAX_FIX_AGE_HOURS: i64 = 48;

/// Device clock skew tolerated between the bridge and the agent.
pub const MAX_FIX_SKEW_SECS: i64 = 300;

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(invalid("latitude_range", "Latitude must be between -90 and 90"))
    }
}

pub fn validate_longitude(lon: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(invalid("longitude_range", "Longitude must be between -180 and 180"))
    }
}

/// Horizontal accuracy in meters. NaN is rejected.
pub fn validate_accuracy(accuracy: f64) -> Result<(), ValidationError> {
    if accuracy >= 0.0 {
        Ok(())
    } else {
        Err(invalid("accuracy_range", "Accuracy must be non-negative"))
    }
}

/// Heading in degrees, 0 and 360 both meaning north.
pub fn validate_bearing(bearing: f64) -> Result<(), ValidationError> {
    if (0.0..=360.0).contains(&bearing) {
        Ok(())
    } else {
        Err(invalid("bearing_range", "Bearing must be between 0 and 360"))
    }
}

pub fn validate_speed(speed: f64) -> Result<(), ValidationError> {
    if speed >= 0.0 {
        Ok(())
    } else {
        Err(invalid("speed_range", "Speed must be non-negative"))
    }
}

/// Geofence radius in meters; must be finite and positive.
pub fn validate_radius(radius: f64) -> Result<(), ValidationError> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(invalid("radius_range", "Radius must be greater than 0 meters"))
    }
}

/// Capture time of a pushed fix, in milliseconds since epoch.
pub fn validate_timestamp(timestamp_millis: i64) -> Result<(), ValidationError> {
    let captured_at = Utc
        .timestamp_millis_opt(timestamp_millis)
        .single()
        .ok_or_else(|| invalid("timestamp_invalid", "Invalid timestamp format"))?;
    validate_fix_time(captured_at, Utc::now())
}

/// Checks a fix capture time against `now`: at most [`MAX_FIX_SKEW_SECS`]
/// ahead and at most [`MAX_FIX_AGE_HOURS`] behind.
pub fn validate_fix_time(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if captured_at > now + Duration::seconds(MAX_FIX_SKEW_SECS) {
        return Err(invalid("timestamp_future", "Fix timestamp is ahead of the agent clock"));
    }
    if captured_at < now - Duration::hours(MAX_FIX_AGE_HOURS) {
        return Err(invalid("timestamp_old", "Fix is older than the bridge buffer window"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn message(err: ValidationError) -> String {
        err.message.map(|m| m.to_string()).unwrap_or_default()
    }

    #[test]
    fn test_fix_from_bridge() {
        // A phone fix near the Bratislava office.
        assert!(validate_latitude(48.1486).is_ok());
        assert!(validate_longitude(17.1077).is_ok());
        assert!(validate_accuracy(12.5).is_ok());
        assert!(validate_speed(1.4).is_ok());
        assert!(validate_bearing(359.5).is_ok());
    }

    #[test]
    fn test_fix_at_coordinate_limits() {
        assert!(validate_latitude(90.0).is_ok());
        assert!(validate_latitude(-90.0).is_ok());
        assert!(validate_longitude(180.0).is_ok());
        assert!(validate_longitude(-180.0).is_ok());
        assert!(validate_bearing(0.0).is_ok());
        assert!(validate_bearing(360.0).is_ok());
        assert!(validate_accuracy(0.0).is_ok());
    }

    #[test]
    fn test_broken_fix_fields() {
        assert_eq!(
            message(validate_latitude(95.0).unwrap_err()),
            "Latitude must be between -90 and 90"
        );
        assert!(validate_longitude(-180.5).is_err());
        assert!(validate_accuracy(-1.0).is_err());
        assert!(validate_accuracy(f64::NAN).is_err());
        assert!(validate_speed(-0.1).is_err());
        assert_eq!(validate_bearing(361.0).unwrap_err().code, "bearing_range");
    }

    #[test]
    fn test_geofence_radius() {
        assert!(validate_radius(150.0).is_ok());
        assert!(validate_radius(0.5).is_ok());
        assert!(validate_radius(0.0).is_err());
        assert!(validate_radius(-25.0).is_err());
        assert!(validate_radius(f64::INFINITY).is_err());
        assert_eq!(
            message(validate_radius(f64::NAN).unwrap_err()),
            "Radius must be greater than 0 meters"
        );
    }

    #[test]
    fn test_buffered_fix_from_yesterday() {
        let yesterday_evening = now() - Duration::hours(15);
        assert!(validate_fix_time(yesterday_evening, now()).is_ok());

        let edge = now() - Duration::hours(MAX_FIX_AGE_HOURS);
        assert!(validate_fix_time(edge, now()).is_ok());

        let err = validate_fix_time(edge - Duration::seconds(1), now()).unwrap_err();
        assert_eq!(err.code, "timestamp_old");
    }

    #[test]
    fn test_fix_from_skewed_device_clock() {
        assert!(validate_fix_time(now() + Duration::seconds(MAX_FIX_SKEW_SECS), now()).is_ok());
        let err = validate_fix_time(now() + Duration::minutes(6), now()).unwrap_err();
        assert_eq!(err.code, "timestamp_future");
    }

    #[test]
    fn test_timestamp_millis() {
        assert!(validate_timestamp(Utc::now().timestamp_millis()).is_ok());
        let last_month = Utc::now() - Duration::days(30);
        assert!(validate_timestamp(last_month.timestamp_millis()).is_err());
        assert_eq!(
            validate_timestamp(i64::MAX).unwrap_err().code,
            "timestamp_invalid"
        );
    }
}
