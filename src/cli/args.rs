//! CLI argument definitions using clap
//!
//! Commands:
//! - replctl init
//! - replctl topology
//! - replctl add-replica <id> --host <host> --data-dir <dir>
//! - replctl remove-replica <id>
//! - replctl bootstrap [--replica <id>]
//! - replctl health
//! - replctl monitor
//! - replctl promote <id> [--force]
//! - replctl reclaim-slots

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// replctl - control plane for a streaming-replication database cluster
#[derive(Parser, Debug)]
#[command(name = "replctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./replctl.json")]
    pub config: PathBuf,

    /// Emit log records on stderr as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the state directory and persist the initial topology
    Init,

    /// Print the persisted topology
    Topology,

    /// Register a new replica in Provisioning
    AddReplica {
        /// Node id
        id: String,

        #[arg(long)]
        host: String,

        #[arg(long, default_value_t = 5432)]
        port: u16,

        /// Data directory the base backup is written into
        #[arg(long)]
        data_dir: PathBuf,

        /// Slot name on the primary (default: <id>_slot)
        #[arg(long)]
        slot_name: Option<String>,

        /// Application name reported to the primary (default: <id>)
        #[arg(long)]
        application_name: Option<String>,
    },

    /// Decommission a replica and drop its replication slot
    RemoveReplica {
        /// Node id
        id: String,
    },

    /// Bootstrap one replica, or every replica when none is given
    Bootstrap {
        #[arg(long)]
        replica: Option<String>,
    },

    /// Run one health cycle and print the snapshot
    Health,

    /// Poll health until interrupted
    Monitor,

    /// Promote a replica to primary
    Promote {
        /// Node id of the replica to promote
        id: String,

        /// Promote even if the current primary still answers probes
        #[arg(long)]
        force: bool,

        /// Free-form reason recorded in the explanation
        #[arg(long)]
        reason: Option<String>,
    },

    /// Drop replication slots no live replica is bound to
    ReclaimSlots,
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}
