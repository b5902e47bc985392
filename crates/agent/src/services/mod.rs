//! Agent services: the attendance monitor, the sync worker and the
//! remote authority client.

pub mod location_provider;
pub mod monitor;
pub mod remote_client;
pub mod sync_worker;

pub use location_provider::LastKnownLocation;
pub use monitor::{
    AttendanceMonitor, CommandError, FenceRef, LoopSnapshot, ManualPunch, MonitorDeps,
    MonitorSettings, MonitorStatus, SampleSource,
};
pub use remote_client::HttpRemoteAuthority;
pub use sync_worker::{Connectivity, SyncReport, SyncWorker};
