//! Wall-clock parsing helpers for working-hour schedules.
//!
//! Schedules arrive from the remote authority as strings such as `"09:00"`
//! or `"18:30:00"`. They are parsed once into [`NaiveTime`] values.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

/// Error returned when a clock string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid clock time '{0}': expected HH:MM or HH:MM:SS")]
pub struct ClockTimeError(pub String);

/// Parses a wall-clock string in `HH:MM` or `HH:MM:SS` form.
///
/// Single-digit hours (`"9:00"`) are accepted because legacy schedules were
/// stored that way.
pub fn parse_clock_time(value: &str) -> Result<NaiveTime, ClockTimeError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ClockTimeError(value.to_string()))
}

/// Formats a time as `HH:MM`, or `HH:MM:SS` when seconds are set.
pub fn format_clock_time(time: NaiveTime) -> String {
    if time.second() == 0 {
        time.format("%H:%M").to_string()
    } else {
        time.format("%H:%M:%S").to_string()
    }
}

/// Whole minutes from `earlier` to `later`, floored at zero.
pub fn minutes_after(later: NaiveDateTime, earlier: NaiveDateTime) -> i64 {
    (later - earlier).num_minutes().max(0)
}

/// Serde adapter for `NaiveTime` values stored as clock strings.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_clock_time(*time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_clock_time(&raw).map_err(serde::de::Error::custom)
    }
}
