//! Replica bootstrap
//!
//! Turns an empty (or stale) replica data directory into a standby that
//! streams from the primary through its own replication slot. The protocol
//! is resumable: progress is checkpointed per replica, and re-running it
//! on a finished replica is a no-op.

mod checkpoint;
mod errors;
mod executor;
mod standby;

pub use checkpoint::{BootstrapCheckpoint, BootstrapPhase, CheckpointStore};
pub use errors::{BootstrapError, BootstrapResult};
pub use executor::{BootstrapExecutor, BootstrapTarget, Ready};
pub use standby::{
    is_valid_standby, read_standby_config, write_standby_config, StandbyConfig, AUTO_CONF_FILE,
    STANDBY_SIGNAL_FILE, VERSION_FILE,
};
