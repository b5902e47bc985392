//! Domain layer for the GeoAttend agent.
//!
//! This crate contains:
//! - Domain models (Geofence, LocationSample, AttendanceDay, QueueEntry)
//! - The attendance engine: catalog, evaluator, state machine, offline queue
//! - Collaborator traits with in-memory and mock implementations
//! - Domain error types

pub mod errors;
pub mod models;
pub mod services;
