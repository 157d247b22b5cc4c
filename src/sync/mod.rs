//! Resource synchronization engine: controllers, coalescing, recency
//! bookkeeping and refetch triggers.

pub mod coalescer;
pub mod controller;
pub mod ledger;
pub mod params;
pub mod realtime;
pub mod registry;
pub mod tombstones;

pub use controller::{
  ControllerOptions, DeleteOutcome, ResourceController, ResourceSnapshot, SyncContext, SyncWindows,
};
pub use params::{ParamSource, QueryParams};
pub use realtime::{RealtimeConfig, RealtimeTrigger, TriggerReason};
pub use registry::{RefetchRegistry, Registration};
pub use tombstones::TombstoneStore;
