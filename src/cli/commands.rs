//! CLI command implementations
//!
//! Each invocation opens a controller over the persisted topology, runs one
//! command and prints one JSON response. The CLI holds no state between
//! invocations; everything it needs is in the topology file.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::cancel::CancelToken;
use crate::config::{ClusterConfig, ReplicaConfig};
use crate::controller::ClusterController;
use crate::engine::{CommandEngine, DynEngine};
use crate::observability::{self, LogFormat};
use crate::promotion::PromotionRequest;
use crate::topology::{FileTopologyStore, NodeId};

use super::args::{parse_args, Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Parse arguments, install logging and run the command.
pub async fn run() -> CliResult<()> {
    let cli = parse_args();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    observability::init_logging(format);
    run_command(cli).await
}

/// Run a parsed command and write its response.
pub async fn run_command(cli: Cli) -> CliResult<()> {
    let controller = match cli.command {
        Command::Init => init(&cli.config)?,
        _ => open(&cli.config)?,
    };
    let data = execute(&controller, cli.command).await?;
    write_response(data)
}

/// Create the state directory and persist the initial topology.
pub fn init(config_path: &Path) -> CliResult<ClusterController> {
    let config = ClusterConfig::load(config_path)?;
    if config.topology_path().exists() {
        return Err(CliError::already_initialized(&config.cluster_name));
    }
    fs::create_dir_all(&config.state_dir)?;
    fs::create_dir_all(config.checkpoint_dir())?;
    connect(config)
}

/// Open the controller of an initialized cluster.
fn open(config_path: &Path) -> CliResult<ClusterController> {
    let config = ClusterConfig::load(config_path)?;
    if !config.topology_path().exists() {
        return Err(CliError::not_initialized(&config.cluster_name));
    }
    connect(config)
}

fn connect(config: ClusterConfig) -> CliResult<ClusterController> {
    let engine: DynEngine = Arc::new(CommandEngine::new(&config.engine));
    let store = Arc::new(FileTopologyStore::new(config.topology_path()));
    Ok(ClusterController::open(config, engine, store)?)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: &CancelToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn execute(controller: &ClusterController, command: Command) -> CliResult<Value> {
    let cancel = CancelToken::new();
    cancel_on_interrupt(&cancel);

    let data = match command {
        Command::Init => json!({ "initialized": true, "topology": controller.get_topology().await }),

        Command::Topology => json!(controller.get_topology().await),

        Command::AddReplica {
            id,
            host,
            port,
            data_dir,
            slot_name,
            application_name,
        } => {
            let mut replica = ReplicaConfig::new(id, host, port, data_dir);
            replica.slot_name = slot_name;
            replica.application_name = application_name;
            json!(controller.add_replica(replica).await?)
        }

        Command::RemoveReplica { id } => {
            json!(controller.remove_replica(&NodeId::from(id)).await?)
        }

        Command::Bootstrap { replica: Some(id) } => {
            json!(controller.bootstrap_replica(&NodeId::from(id), &cancel).await?)
        }

        Command::Bootstrap { replica: None } => {
            let results: Vec<Value> = controller
                .bootstrap_all(&cancel)
                .await
                .into_iter()
                .map(|(node, result)| match result {
                    Ok(ready) => json!({ "node": node, "status": "ok", "ready": ready }),
                    Err(e) => json!({
                        "node": node,
                        "status": "error",
                        "code": e.code(),
                        "class": e.class().as_str(),
                        "message": e.to_string(),
                    }),
                })
                .collect();
            json!({ "results": results })
        }

        Command::Health => {
            let snapshot = controller.poll_health().await?;
            json!(snapshot.as_ref())
        }

        Command::Monitor => {
            controller.run(&cancel).await?;
            json!({ "stopped": true, "topology": controller.get_topology().await })
        }

        Command::Promote { id, force, reason } => {
            // A fresh process has no snapshot; take one before validating.
            controller.poll_health().await?;
            let mut request = PromotionRequest::new(NodeId::from(id)).with_force(force);
            if let Some(reason) = reason {
                request = request.with_reason(reason);
            }
            match controller.submit_promotion(request, &cancel).await {
                Ok(report) => json!({
                    "summary": report.explanation.summary(),
                    "explanation": report.explanation,
                    "topology": report.topology,
                }),
                Err(e) => {
                    if let Some(explanation) = controller.last_promotion() {
                        tracing::info!(summary = %explanation.summary(), "promotion not completed");
                    }
                    return Err(e.into());
                }
            }
        }

        Command::ReclaimSlots => {
            json!({ "slots": controller.reclaim_orphaned_slots().await? })
        }
    };
    Ok(data)
}
