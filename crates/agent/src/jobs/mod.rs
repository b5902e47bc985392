//! Background job scheduler and job implementations.

mod catalog_refresh;
mod location_poll;
mod pool_metrics;
mod scheduler;
mod sync;

pub use catalog_refresh::CatalogRefreshJob;
pub use location_poll::LocationPollJob;
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use sync::SyncJob;
