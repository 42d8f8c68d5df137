//! Shared fixture: a controller over a simulated engine, with its state
//! directory and replica data directories in a temp dir.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use replctl::cancel::CancelToken;
use replctl::config::ClusterConfig;
use replctl::controller::ClusterController;
use replctl::engine::{Endpoint, SimulatedEngine};
use replctl::topology::{FileTopologyStore, NodeId};
use serde_json::json;
use tempfile::TempDir;

pub const PRIMARY: &str = "primary";
pub const PRIMARY_HOST: &str = "db-primary";

pub fn config(dir: &TempDir, replicas: &[&str]) -> ClusterConfig {
    let replicas: Vec<_> = replicas
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "host": id,
                "data_dir": dir.path().join("data").join(id),
            })
        })
        .collect();
    let value = json!({
        "cluster_name": "main",
        "state_dir": dir.path().join("state"),
        "credentials": {"user": "replicator", "password": "secret"},
        "primary": {"id": PRIMARY, "host": PRIMARY_HOST},
        "replicas": replicas,
        "bootstrap": {
            "primary_wait_interval_ms": 5,
            "primary_wait_attempts": 3,
            "max_base_backup_attempts": 2
        },
        "health": {
            "poll_interval_ms": 10,
            "probe_timeout_ms": 500,
            "lag_threshold_bytes": 1048576,
            "failure_threshold": 2
        },
        "promotion": {
            "confirm_attempts": 2,
            "confirm_interval_ms": 10,
            "decommission_grace_secs": 300
        }
    });
    ClusterConfig::from_json(&value.to_string()).unwrap()
}

pub struct Cluster {
    pub dir: TempDir,
    pub engine: Arc<SimulatedEngine>,
    pub config: ClusterConfig,
    pub controller: ClusterController,
}

impl Cluster {
    /// Running primary, replica hosts registered but empty.
    pub fn new(replicas: &[&str]) -> Self {
        Self::with_config(replicas, |_| {})
    }

    pub fn with_config(replicas: &[&str], tweak: impl FnOnce(&mut ClusterConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, replicas);
        tweak(&mut config);

        let engine = Arc::new(SimulatedEngine::new());
        let primary = Endpoint::new(PRIMARY_HOST, 5432, &config.credentials);
        engine.add_primary(&primary);
        for replica in &config.replicas {
            engine.add_server(&Endpoint::new(
                replica.host.clone(),
                replica.port,
                &config.credentials,
            ));
        }

        let controller = open(&config, &engine);
        Self {
            dir,
            engine,
            config,
            controller,
        }
    }

    /// Every replica bootstrapped, started as a standby and observed once.
    pub async fn streaming(replicas: &[&str]) -> Self {
        let cluster = Self::new(replicas);
        cluster.start_all().await;
        cluster
    }

    pub async fn start_all(&self) {
        for id in self.config.replicas.iter().map(|r| r.id.clone()) {
            self.bootstrap_and_start(id.as_str()).await;
        }
        self.controller.poll_health().await.unwrap();
    }

    /// Simulate a controller restart over the same state directory.
    pub fn reopen(&self) -> ClusterController {
        open(&self.config, &self.engine)
    }

    pub fn endpoint(&self, id: &str) -> Endpoint {
        if id == PRIMARY {
            return Endpoint::new(PRIMARY_HOST, 5432, &self.config.credentials);
        }
        Endpoint::new(id, 5432, &self.config.credentials)
    }

    pub fn data_dir(&self, id: &str) -> PathBuf {
        self.dir.path().join("data").join(id)
    }

    pub async fn bootstrap_and_start(&self, id: &str) {
        self.controller
            .bootstrap_replica(&NodeId::from(id), &CancelToken::new())
            .await
            .unwrap();
        self.engine
            .start_standby(&self.endpoint(id), &self.data_dir(id))
            .unwrap();
    }

    /// Run `n` health cycles.
    pub async fn poll(&self, n: usize) {
        for _ in 0..n {
            self.controller.poll_health().await.unwrap();
        }
    }
}

fn open(config: &ClusterConfig, engine: &Arc<SimulatedEngine>) -> ClusterController {
    let store = Arc::new(FileTopologyStore::new(config.topology_path()));
    ClusterController::open(config.clone(), engine.clone(), store).unwrap()
}

pub fn id(s: &str) -> NodeId {
    NodeId::from(s)
}
