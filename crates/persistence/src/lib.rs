//! Persistence layer for the GeoAttend agent.
//!
//! This crate contains:
//! - SQLite connection management and embedded migrations
//! - Entity definitions (database row mappings)
//! - The key/value state repository backing the domain `StateStore`

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
