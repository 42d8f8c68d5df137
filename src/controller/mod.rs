//! Cluster controller
//!
//! Top-level state machine composing slot management, bootstrap, health
//! monitoring and promotion. The controller exclusively owns the cluster
//! topology: every mutation is applied to a copy, persisted, and only then
//! installed, so the in-memory topology never runs ahead of the store.
//!
//! Concurrency:
//! - bootstraps hold a shared mutation guard and run concurrently
//! - promotion takes the exclusive guard without waiting and is rejected
//!   with `PromotionInProgress` when another mutation holds it
//! - adding and removing replicas queue on the exclusive guard
//! - health results are applied only if the topology generation did not
//!   move while the cycle ran

mod apply;

pub use apply::{apply_snapshot, Applied};

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::bootstrap::{BootstrapExecutor, BootstrapTarget, CheckpointStore, Ready};
use crate::cancel::CancelToken;
use crate::config::{validate_replica, ClusterConfig, ReplicaConfig};
use crate::engine::{DynEngine, Endpoint};
use crate::error::{ControlError, ControlResult};
use crate::health::{HealthError, HealthMonitor, HealthSnapshot};
use crate::observability::Event;
use crate::promotion::{
    PromotionCoordinator, PromotionExplanation, PromotionReport, PromotionRequest,
};
use crate::slots::{orphaned_slots, ReplicationSlotManager, SlotError};
use crate::topology::{
    ClusterTopology, Node, NodeId, NodeState, ReplicationSlot, SlotState, StoreError,
    TopologyError, TopologyStore,
};

/// Outcome of reclaiming one orphaned slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotReclaim {
    pub slot: String,
    pub dropped: bool,
    pub error: Option<String>,
}

pub struct ClusterController {
    config: Arc<ClusterConfig>,
    store: Arc<dyn TopologyStore>,
    topology: RwLock<ClusterTopology>,
    snapshot: RwLock<Option<Arc<HealthSnapshot>>>,
    mutation: RwLock<()>,
    slots: Arc<ReplicationSlotManager>,
    bootstrap: BootstrapExecutor,
    monitor: HealthMonitor,
    promotion: PromotionCoordinator,
}

impl ClusterController {
    /// Load the persisted topology, or seed it from `config` on first start.
    ///
    /// Replicas present in `config` but never seen before are added; the
    /// persisted topology wins for everything else.
    pub fn open(
        config: ClusterConfig,
        engine: DynEngine,
        store: Arc<dyn TopologyStore>,
    ) -> ControlResult<Self> {
        config.validate()?;

        let (mut topology, seeded) = match store.load()? {
            Some(persisted) if persisted.cluster_name != config.cluster_name => {
                return Err(StoreError::ClusterMismatch {
                    expected: config.cluster_name.clone(),
                    found: persisted.cluster_name,
                }
                .into());
            }
            Some(mut persisted) => {
                let mut added = false;
                for replica in &config.replicas {
                    if !persisted.nodes.contains_key(&replica.id) {
                        persisted.add_replica(replica)?;
                        added = true;
                    }
                }
                (persisted, added)
            }
            None => (ClusterTopology::from_config(&config)?, true),
        };

        let slots = Arc::new(ReplicationSlotManager::new(engine.clone()));
        let bootstrap = BootstrapExecutor::new(
            engine.clone(),
            config.bootstrap.clone(),
            CheckpointStore::new(config.checkpoint_dir()),
        );
        let monitor = HealthMonitor::new(
            engine.clone(),
            slots.clone(),
            config.credentials.clone(),
            config.health.clone(),
        )
        .with_state_file(config.health_state_path());
        let promotion = PromotionCoordinator::new(
            engine,
            slots.clone(),
            config.credentials.clone(),
            config.promotion.clone(),
            config.health.probe_timeout(),
        );

        if seeded {
            topology.bump();
            store.save(&topology)?;
        }

        tracing::info!(
            event = %Event::ControllerOpen,
            cluster = %config.cluster_name,
            generation = topology.generation,
            primary = %topology.primary,
            replicas = topology.replicas.len(),
            seeded,
            "controller open"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            topology: RwLock::new(topology),
            snapshot: RwLock::new(None),
            mutation: RwLock::new(()),
            slots,
            bootstrap,
            monitor,
            promotion,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current topology.
    pub async fn get_topology(&self) -> ClusterTopology {
        self.topology.read().await.clone()
    }

    /// Last health snapshot.
    pub async fn get_health_snapshot(&self) -> ControlResult<Arc<HealthSnapshot>> {
        self.snapshot
            .read()
            .await
            .clone()
            .ok_or_else(|| HealthError::NoSnapshot.into())
    }

    /// Explanation of the most recent promotion attempt.
    pub fn last_promotion(&self) -> Option<PromotionExplanation> {
        self.promotion.last_explanation()
    }

    // =========================================================================
    // TOPOLOGY MUTATION
    // =========================================================================

    /// Persist `next` as the successor of `live` and install it.
    fn install(&self, live: &mut ClusterTopology, mut next: ClusterTopology) -> ControlResult<()> {
        next.generation = live.generation + 1;
        self.store.save(&next)?;
        tracing::debug!(
            event = %Event::TopologyPersisted,
            generation = next.generation,
            primary = %next.primary,
            "topology persisted"
        );
        *live = next;
        Ok(())
    }

    /// Apply `change` to a copy of the topology, then persist and install it.
    async fn update<T>(
        &self,
        change: impl FnOnce(&mut ClusterTopology) -> ControlResult<T>,
    ) -> ControlResult<T> {
        let mut live = self.topology.write().await;
        let mut next = live.clone();
        let value = change(&mut next)?;
        self.install(&mut live, next)?;
        Ok(value)
    }

    async fn primary_endpoint(&self) -> ControlResult<Endpoint> {
        let topology = self.topology.read().await;
        Ok(topology.primary_node()?.endpoint(&self.config.credentials))
    }

    /// Add a replica in `Provisioning`.
    pub async fn add_replica(&self, replica: ReplicaConfig) -> ControlResult<Node> {
        validate_replica(&replica)?;
        let _guard = self.mutation.write().await;

        let node = self
            .update(|topology| Ok(topology.add_replica(&replica)?.clone()))
            .await?;
        tracing::info!(node = %node.id, slot = node.slot_name.as_deref().unwrap_or(""), "replica added");
        Ok(node)
    }

    /// Decommission a replica and reclaim its slot.
    ///
    /// The slot is dropped even while the replica still streams from it. If
    /// the drop fails the slot stays in the topology as `Orphaned`.
    pub async fn remove_replica(&self, id: &NodeId) -> ControlResult<Node> {
        let _guard = self.mutation.write().await;

        let node = self.topology.read().await.replica(id)?.clone();
        let primary = self.primary_endpoint().await?;

        let mut slot_dropped = true;
        if let Some(name) = &node.slot_name {
            match self.slots.drop_slot(&primary, name, true).await {
                Ok(()) | Err(SlotError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        event = %Event::OrphanedSlot,
                        node = %id,
                        slot = %name,
                        error = %e,
                        "could not drop slot of removed replica"
                    );
                    slot_dropped = false;
                }
            }
        }

        let removed = self
            .update(|topology| {
                topology.decommission_replica(id)?;
                if let Some(name) = &node.slot_name {
                    if slot_dropped {
                        topology.slots.remove(name);
                    } else if let Some(slot) = topology.slots.get_mut(name) {
                        slot.state = SlotState::Orphaned;
                    }
                }
                Ok(topology.node(id)?.clone())
            })
            .await?;

        self.monitor.reset(id);
        if let Err(e) = self.bootstrap.checkpoints().remove(id) {
            tracing::warn!(node = %id, error = %e, "could not remove bootstrap checkpoint");
        }
        Ok(removed)
    }

    // =========================================================================
    // BOOTSTRAP
    // =========================================================================

    /// Bootstrap one replica: ensure its slot, then run the executor.
    ///
    /// Re-running on a bootstrapped replica returns `Ready` without copying
    /// any data.
    pub async fn bootstrap_replica(&self, id: &NodeId, cancel: &CancelToken) -> ControlResult<Ready> {
        let _guard = self.mutation.read().await;

        let (node, primary) = {
            let topology = self.topology.read().await;
            let node = topology.replica(id)?.clone();
            let primary = topology.primary_node()?.endpoint(&self.config.credentials);
            (node, primary)
        };
        let (data_dir, slot_name) = match (&node.data_dir, &node.slot_name) {
            (Some(dir), Some(slot)) => (dir.clone(), slot.clone()),
            _ => return Err(TopologyError::NotAReplica(id.to_string()).into()),
        };

        if !node.bootstrap_complete && node.state != NodeState::Bootstrapping {
            self.update(|topology| {
                topology.node_mut(id)?.transition(NodeState::Bootstrapping)?;
                Ok(())
            })
            .await?;
        }

        let slot_state = match self.slots.ensure_slot(&primary, &slot_name).await {
            Ok(state) => state,
            Err(e) => {
                self.record_failure(id, &e.to_string()).await;
                return Err(e.into());
            }
        };
        self.update(|topology| {
            match topology.slots.get_mut(&slot_name) {
                Some(slot) => slot.state = slot_state,
                None => {
                    let mut slot = ReplicationSlot::new(slot_name.clone(), id.clone());
                    slot.state = slot_state;
                    topology.slots.insert(slot_name.clone(), slot);
                }
            }
            Ok(())
        })
        .await?;

        let target = BootstrapTarget {
            node_id: id.clone(),
            data_dir,
            slot_name,
            application_name: node.application_name.clone(),
            primary,
        };
        match self.bootstrap.bootstrap(&target, cancel).await {
            Ok(ready) => {
                self.update(|topology| {
                    let node = topology.node_mut(id)?;
                    node.bootstrap_complete = true;
                    node.last_error = None;
                    node.updated_at = Utc::now();
                    Ok(())
                })
                .await?;
                Ok(ready)
            }
            Err(e) => {
                self.record_failure(id, &e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Bootstrap every live replica concurrently.
    pub async fn bootstrap_all(&self, cancel: &CancelToken) -> Vec<(NodeId, ControlResult<Ready>)> {
        let ids = self.topology.read().await.replicas.clone();
        let results = join_all(ids.iter().map(|id| self.bootstrap_replica(id, cancel))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Keep a per-node failure on the node instead of failing the controller.
    async fn record_failure(&self, id: &NodeId, error: &str) {
        let result = self
            .update(|topology| {
                topology.node_mut(id)?.record_error(error);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(node = %id, error = %e, "could not record node failure");
        }
    }

    // =========================================================================
    // HEALTH
    // =========================================================================

    /// Run one monitor cycle and apply its results.
    pub async fn poll_health(&self) -> ControlResult<Arc<HealthSnapshot>> {
        let observed = self.get_topology().await;
        let snapshot = self.monitor.poll(&observed).await?;

        // Another mutation is in flight; its result supersedes this cycle.
        let guard = match self.mutation.try_read() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(generation = snapshot.generation, "topology busy, health cycle not applied");
                return Ok(Arc::new(snapshot));
            }
        };

        let mut live = self.topology.write().await;
        if live.generation != snapshot.generation {
            tracing::debug!(
                observed = snapshot.generation,
                current = live.generation,
                "discarding health cycle computed against an older topology"
            );
            return Ok(Arc::new(snapshot));
        }

        let mut next = live.clone();
        let applied = apply_snapshot(
            &mut next,
            &snapshot,
            self.config.promotion.decommission_grace(),
            Utc::now(),
        );
        if applied.changed {
            self.install(&mut live, next)?;
        }
        drop(live);
        drop(guard);

        for id in &applied.decommissioned {
            self.monitor.reset(id);
        }

        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Drop every physical slot on the primary with no live replica bound.
    ///
    /// Slots that are still being consumed are left alone and reported.
    pub async fn reclaim_orphaned_slots(&self) -> ControlResult<Vec<SlotReclaim>> {
        let _guard = self.mutation.write().await;
        let primary = self.primary_endpoint().await?;

        let records = self.slots.list_slots(&primary).await?;
        let orphaned = {
            let topology = self.topology.read().await;
            orphaned_slots(&topology, &records)
        };

        let mut results = Vec::new();
        for name in orphaned {
            match self.slots.drop_slot(&primary, &name, false).await {
                Ok(()) | Err(SlotError::NotFound(_)) => results.push(SlotReclaim {
                    slot: name,
                    dropped: true,
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!(event = %Event::OrphanedSlot, slot = %name, error = %e, "orphaned slot not reclaimed");
                    results.push(SlotReclaim {
                        slot: name,
                        dropped: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let dropped: Vec<&str> = results
            .iter()
            .filter(|r| r.dropped)
            .map(|r| r.slot.as_str())
            .collect();
        let known = {
            let topology = self.topology.read().await;
            dropped.iter().any(|name| topology.slots.contains_key(*name))
        };
        if known {
            self.update(|topology| {
                for name in &dropped {
                    topology.slots.remove(*name);
                }
                Ok(())
            })
            .await?;
        }
        Ok(results)
    }

    // =========================================================================
    // PROMOTION
    // =========================================================================

    /// Promote replica `id`.
    pub async fn promote(
        &self,
        id: &NodeId,
        force: bool,
        cancel: &CancelToken,
    ) -> ControlResult<PromotionReport> {
        let request = PromotionRequest::new(id.clone()).with_force(force);
        self.submit_promotion(request, cancel).await
    }

    /// Run a promotion request and install the resulting topology.
    pub async fn submit_promotion(
        &self,
        request: PromotionRequest,
        cancel: &CancelToken,
    ) -> ControlResult<PromotionReport> {
        let _guard = self
            .mutation
            .try_write()
            .map_err(|_| ControlError::PromotionInProgress)?;

        let current = self.get_topology().await;
        let snapshot = self.snapshot.read().await.clone();

        let mut report = self
            .promotion
            .promote(&current, snapshot.as_deref(), &request, cancel)
            .await?;

        {
            let mut live = self.topology.write().await;
            self.install(&mut live, report.topology.clone())?;
            report.topology = live.clone();
        }

        self.monitor.reset(&request.candidate);
        self.monitor.reset(&current.primary);
        Ok(report)
    }

    // =========================================================================
    // MONITOR LOOP
    // =========================================================================

    /// Poll on the configured interval until cancelled.
    ///
    /// With auto-failover enabled, an Unreachable primary is replaced by
    /// the healthy replica with the least lag.
    pub async fn run(&self, cancel: &CancelToken) -> ControlResult<()> {
        let interval = self.config.health.poll_interval();
        loop {
            match self.poll_health().await {
                Ok(snapshot) if self.config.promotion.auto_failover => {
                    self.failover(&snapshot, cancel).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(code = e.code(), error = %e, "health cycle failed");
                }
            }
            if cancel.sleep(interval).await {
                return Ok(());
            }
        }
    }

    async fn failover(&self, snapshot: &HealthSnapshot, cancel: &CancelToken) {
        let topology = self.get_topology().await;
        let primary_lost = topology
            .primary_node()
            .map(|n| n.state == NodeState::Unreachable)
            .unwrap_or(false);
        if !primary_lost {
            return;
        }

        let Some(candidate) = failover_candidate(&topology, snapshot) else {
            tracing::warn!(primary = %topology.primary, "primary unreachable and no replica is promotable");
            return;
        };

        let request = PromotionRequest::new(candidate)
            .with_reason(format!("auto-failover: primary {} unreachable", topology.primary));
        match self.submit_promotion(request, cancel).await {
            Ok(report) => {
                tracing::info!(summary = %report.explanation.summary(), "auto-failover complete");
            }
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "auto-failover did not promote");
            }
        }
    }
}

/// Streaming replica with the least lag whose health allows promotion.
pub fn failover_candidate(topology: &ClusterTopology, snapshot: &HealthSnapshot) -> Option<NodeId> {
    topology
        .replica_nodes()
        .filter(|n| n.bootstrap_complete && n.state.is_replicating())
        .filter_map(|n| {
            let health = snapshot.node(&n.id)?;
            health
                .class
                .is_promotable()
                .then(|| (health.lag_bytes.unwrap_or(u64::MAX), n.id.clone()))
        })
        .min()
        .map(|(_, id)| id)
}
