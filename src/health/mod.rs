//! Replication health monitoring
//!
//! Samples every node's liveness, recovery mode and replay lag, and
//! produces an immutable `HealthSnapshot` per cycle. Snapshots are
//! observations only; the controller decides which state transitions they
//! trigger.

mod errors;
mod monitor;
mod snapshot;

pub use errors::{HealthError, HealthResult};
pub use monitor::HealthMonitor;
pub use snapshot::{HealthClass, HealthSnapshot, NodeHealth};
