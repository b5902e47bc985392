//! Repository implementations.

pub mod state;

pub use state::StateRepository;
