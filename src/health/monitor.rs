//! Health monitor
//!
//! One poll cycle probes every monitored node concurrently, each probe
//! bounded by the probe timeout, and lists slots on the primary alongside.
//! The snapshot is assembled only once every probe has finished, so a slow
//! node delays nobody but itself.
//!
//! Failure detection is debounced: a node is classified `Unreachable` only
//! after `failure_threshold` consecutive failed probes. Below the threshold
//! it keeps its previous classification. With a state file the failure
//! counters outlive the process, so one-shot polls debounce too.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use super::errors::{HealthError, HealthResult};
use super::snapshot::{HealthClass, HealthSnapshot, NodeHealth};
use crate::config::{Credentials, HealthConfig};
use crate::engine::{DynEngine, EngineError, EngineResult, Endpoint, Lsn, Statement};
use crate::observability::Event;
use crate::slots::{orphaned_slots, ReplicationSlotManager, SlotError, SlotRecord};
use crate::topology::{write_atomic, ClusterTopology, Node, NodeId, Role, SlotState};

/// Raw result of probing one node.
#[derive(Debug, Clone, Copy)]
struct Sample {
    in_recovery: bool,
    /// Write position on a primary, replay position on a standby
    lsn: Option<Lsn>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Tracker {
    consecutive_failures: u32,
    last_class: Option<HealthClass>,
}

/// Samples liveness, recovery mode and lag of every node.
pub struct HealthMonitor {
    engine: DynEngine,
    slots: Arc<ReplicationSlotManager>,
    credentials: Credentials,
    config: HealthConfig,
    trackers: Mutex<HashMap<NodeId, Tracker>>,
    state_file: Option<PathBuf>,
}

impl HealthMonitor {
    pub fn new(
        engine: DynEngine,
        slots: Arc<ReplicationSlotManager>,
        credentials: Credentials,
        config: HealthConfig,
    ) -> Self {
        Self {
            engine,
            slots,
            credentials,
            config,
            trackers: Mutex::new(HashMap::new()),
            state_file: None,
        }
    }

    /// Keep failure counters in `path`, starting from what it holds.
    ///
    /// An unreadable file starts the counters from zero.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match load_trackers(&path) {
            Ok(trackers) => self.trackers = Mutex::new(trackers),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "health state unreadable, starting fresh");
            }
        }
        self.state_file = Some(path);
        self
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Forget debounce history for `node` (removed or changed role).
    pub fn reset(&self, node: &NodeId) {
        let mut trackers = self.trackers.lock().unwrap_or_else(|e| e.into_inner());
        if trackers.remove(node).is_some() {
            self.save_trackers(&trackers);
        }
    }

    fn save_trackers(&self, trackers: &HashMap<NodeId, Tracker>) {
        let Some(path) = &self.state_file else {
            return;
        };
        let result = serde_json::to_vec_pretty(trackers)
            .map_err(io::Error::from)
            .and_then(|content| write_atomic(path, &content));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist health state");
        }
    }

    /// Whether `node` is sampled: the primary, bootstrapped replicas, and
    /// demoted primaries awaiting decommission.
    fn is_monitored(node: &Node) -> bool {
        node.is_active()
            && (node.role == Role::Primary || node.bootstrap_complete || node.demoted_at.is_some())
    }

    /// Run one poll cycle against `topology`.
    pub async fn poll(&self, topology: &ClusterTopology) -> HealthResult<HealthSnapshot> {
        let primary = topology
            .primary_node()
            .map_err(|_| HealthError::MissingPrimary(topology.primary.to_string()))?;
        let primary_endpoint = primary.endpoint(&self.credentials);

        let monitored: Vec<&Node> = topology
            .nodes
            .values()
            .filter(|n| Self::is_monitored(n))
            .collect();

        let probes = join_all(monitored.iter().map(|node| {
            let endpoint = node.endpoint(&self.credentials);
            async move { self.sample(&endpoint).await }
        }));
        let listing = self.list_slots(&primary_endpoint);
        let (samples, listing) = tokio::join!(probes, listing);

        let checked_at = Utc::now();
        let primary_lsn = monitored
            .iter()
            .zip(samples.iter())
            .find(|(node, _)| node.id == topology.primary)
            .and_then(|(_, sample)| sample.as_ref().ok())
            .filter(|sample| !sample.in_recovery)
            .and_then(|sample| sample.lsn);

        let mut nodes = BTreeMap::new();
        {
            let mut trackers = self.trackers.lock().unwrap_or_else(|e| e.into_inner());
            for (node, sample) in monitored.iter().zip(samples) {
                let tracker = trackers.entry(node.id.clone()).or_default();
                let health = self.classify(node, sample, primary_lsn, tracker, checked_at);
                nodes.insert(node.id.clone(), health);
            }
            self.save_trackers(&trackers);
        }

        // An unlisted primary says nothing about its slots; carry the
        // recorded orphans forward instead.
        let (slots, slots_listed, orphaned) = match listing {
            Ok(records) => {
                let orphaned = orphaned_slots(topology, &records);
                (records, true, orphaned)
            }
            Err(e) => {
                tracing::warn!(primary = %primary_endpoint, error = %e, "slot listing unavailable");
                let orphaned = topology
                    .slots
                    .values()
                    .filter(|slot| slot.state == SlotState::Orphaned)
                    .map(|slot| slot.name.clone())
                    .collect();
                (Vec::new(), false, orphaned)
            }
        };
        for name in &orphaned {
            tracing::warn!(
                event = %Event::OrphanedSlot,
                slot = %name,
                primary = %primary_endpoint,
                "slot has no live replica and retains WAL"
            );
        }

        let snapshot = HealthSnapshot {
            taken_at: checked_at,
            generation: topology.generation,
            primary: topology.primary.clone(),
            primary_lsn,
            nodes,
            slots,
            slots_listed,
            orphaned_slots: orphaned,
        };
        tracing::debug!(
            event = %Event::HealthSnapshot,
            generation = snapshot.generation,
            nodes = snapshot.nodes.len(),
            orphaned = snapshot.orphaned_slots.len(),
            "health snapshot taken"
        );
        Ok(snapshot)
    }

    async fn sample(&self, endpoint: &Endpoint) -> EngineResult<Sample> {
        let limit = self.config.probe_timeout();
        let probe = async {
            self.engine.probe(endpoint).await?;
            let in_recovery = self
                .engine
                .execute(endpoint, &Statement::IsInRecovery)
                .await?
                .scalar_bool()?;
            let position = if in_recovery {
                Statement::LastReplayLsn
            } else {
                Statement::CurrentWalLsn
            };
            let rows = self.engine.execute(endpoint, &position).await?;
            let lsn = rows.scalar()?.map(str::parse::<Lsn>).transpose()?;
            Ok::<Sample, EngineError>(Sample { in_recovery, lsn })
        };
        match tokio::time::timeout(limit, probe).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::timeout(format!(
                "probe of {} exceeded {:?}",
                endpoint, limit
            ))),
        }
    }

    async fn list_slots(&self, primary: &Endpoint) -> Result<Vec<SlotRecord>, SlotError> {
        match tokio::time::timeout(self.config.probe_timeout(), self.slots.list_slots(primary)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::timeout(format!("slot listing on {} timed out", primary)).into()),
        }
    }

    fn classify(
        &self,
        node: &Node,
        sample: EngineResult<Sample>,
        primary_lsn: Option<Lsn>,
        tracker: &mut Tracker,
        checked_at: chrono::DateTime<Utc>,
    ) -> NodeHealth {
        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                tracker.consecutive_failures += 1;
                let class = if tracker.consecutive_failures >= self.config.failure_threshold {
                    HealthClass::Unreachable
                } else {
                    tracker
                        .last_class
                        .unwrap_or_else(|| HealthClass::from_state(node.state))
                };
                tracker.last_class = Some(class);
                tracing::warn!(
                    event = %Event::ProbeFailed,
                    node = %node.id,
                    consecutive_failures = tracker.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    error = %e,
                    "probe failed"
                );
                return NodeHealth {
                    node_id: node.id.clone(),
                    role: node.role,
                    reachable: false,
                    recovery_mode: false,
                    lag_bytes: None,
                    last_checked: checked_at,
                    class,
                    consecutive_failures: tracker.consecutive_failures,
                    error: Some(e.to_string()),
                };
            }
        };

        tracker.consecutive_failures = 0;

        let mut error = None;
        let lag_bytes = match (node.role, sample.lsn, primary_lsn) {
            (Role::Replica, Some(replay), Some(write)) if sample.in_recovery => {
                Some(replay.bytes_behind(write))
            }
            _ => None,
        };

        let class = match (node.role, sample.in_recovery) {
            (Role::Primary, true) => {
                error = Some("primary reports recovery mode".to_string());
                HealthClass::Diverged
            }
            (Role::Replica, false) => {
                error = Some("replica left recovery without a recorded promotion".to_string());
                HealthClass::Diverged
            }
            _ => match lag_bytes {
                Some(lag) if lag > self.config.lag_threshold_bytes => HealthClass::Lagging,
                _ => HealthClass::Healthy,
            },
        };
        tracker.last_class = Some(class);

        NodeHealth {
            node_id: node.id.clone(),
            role: node.role,
            reachable: true,
            recovery_mode: sample.in_recovery,
            lag_bytes,
            last_checked: checked_at,
            class,
            consecutive_failures: 0,
            error,
        }
    }
}

fn load_trackers(path: &Path) -> io::Result<HashMap<NodeId, Tracker>> {
    match fs::read(path) {
        Ok(content) => serde_json::from_slice(&content).map_err(io::Error::from),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e),
    }
}
