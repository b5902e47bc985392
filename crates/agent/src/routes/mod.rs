//! Local control surface handlers.

pub mod attendance;
pub mod health;
pub mod locations;
pub mod status;
pub mod sync;
