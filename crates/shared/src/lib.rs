//! Shared utilities and common types for the GeoAttend workspace.
//!
//! This crate provides common functionality used across all other crates:
//! - Coordinate, accuracy and timestamp validation
//! - Wall-clock time parsing for working-hour schedules

pub mod time;
pub mod validation;
