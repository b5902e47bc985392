//! Domain services for the attendance engine.
//!
//! Pure engine components (catalog, evaluator, state machine, offline
//! queue) and the collaborator traits the agent injects implementations of.

pub mod attendance_machine;
pub mod catalog;
pub mod clock;
pub mod durable_queue;
pub mod evaluator;
pub mod location;
pub mod notification;
pub mod offline_queue;
pub mod remote;
pub mod store;

pub use attendance_machine::{
    AttendanceStateMachine, DuplicateEventSuppressed, MachineEvent, MachineState, Observation,
    PunchPosition, StateChange, Step, SuppressReason,
};
pub use catalog::{CatalogLoad, GeofenceCatalog};
pub use clock::{Clock, FixedClock, SystemClock};
pub use durable_queue::DurableQueue;
pub use evaluator::{evaluate, haversine_distance, Evaluation, EARTH_RADIUS_METERS};
pub use location::{LocationProvider, MockLocationProvider};
pub use notification::{
    LoggingNotificationDispatcher, MockNotificationDispatcher, NotificationDispatcher,
    NotificationKind, NotificationResult, NotificationTrigger,
};
pub use offline_queue::{AppendOutcome, OfflineQueue, QueueOverflow, DEFAULT_QUEUE_CAPACITY};
pub use remote::{
    AttendanceSubmission, ContainmentCheck, LocationBatchItem, MockRemoteAuthority, RemoteAuthority,
    RemoteCall, SubmitOutcome,
};
pub use store::{MemoryStateStore, StateStore, ATTENDANCE_STATE_KEY, QUEUE_STATE_KEY};
