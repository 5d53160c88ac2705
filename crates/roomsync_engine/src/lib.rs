#![forbid(unsafe_code)]

pub mod error;
pub mod failover;
pub mod fetch;
pub mod hashgate;
pub mod presence;
pub mod sweep;

pub use error::{EngineError, EngineResult};
pub use failover::FailoverPlan;
pub use fetch::{ExtraProjector, NullProjector, RoomUpdates, SyncConfig, SyncEngine};
pub use hashgate::ChangeHashCache;
pub use presence::PresenceTracker;
pub use sweep::{AgingSweep, SweepReport, SweepThresholds};



#[cfg(test)]
mod sweep_tests;
