//! CLI module for replctl
//!
//! Provides command-line access to the cluster controller:
//! - init: create the state directory and persist the initial topology
//! - topology / health: inspect the cluster
//! - add-replica / remove-replica / bootstrap: manage replicas
//! - promote: explicit, validated promotion
//! - monitor: poll health until interrupted
//! - reclaim-slots: drop orphaned replication slots

mod args;
mod commands;
mod errors;
mod io;

pub use args::{parse_args, Cli, Command};
pub use commands::{init, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
