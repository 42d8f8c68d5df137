//! Promotion Coordinator
//!
//! Drives one promotion attempt through the promotion state machine:
//!
//! 1. validate the candidate against the topology, the last health
//!    snapshot and a live probe of the current primary
//! 2. issue the promotion to the candidate and wait until it leaves recovery
//! 3. rewrite the topology: candidate becomes primary, the old primary is
//!    demoted and left Unreachable pending its grace period
//! 4. reconcile every remaining replica: slot on the new primary, upstream
//!    connection info re-pointed, configuration reloaded
//!
//! The input topology is never modified; the caller commits the returned
//! one. A replica that cannot be reconciled is marked Unreachable with its
//! error recorded and left for the next health cycle. Nothing is rolled
//! back once the promotion has been confirmed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;

use super::errors::{PromotionError, PromotionResult};
use super::explanation::{PromotionExplanation, PromotionOutcome, ReconcileResult};
use super::request::PromotionRequest;
use super::state::PromotionState;
use super::validator::{PromotionValidator, ValidationContext, ValidationResult};
use crate::cancel::CancelToken;
use crate::config::{Credentials, PromotionConfig};
use crate::engine::{DynEngine, EngineError, Endpoint, Statement};
use crate::health::HealthSnapshot;
use crate::observability::Event;
use crate::retry::{retry, RetryError};
use crate::slots::{observed_state, ReplicationSlotManager};
use crate::topology::{ClusterTopology, NodeId, NodeState, ReplicationSlot, Role, SlotState};

/// Result of a successful promotion.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub topology: ClusterTopology,
    pub explanation: PromotionExplanation,
}

/// One replica to re-point at the new primary.
struct ReconcileTarget {
    id: NodeId,
    endpoint: Endpoint,
    slot_name: String,
    application_name: String,
}

/// State of the attempt in flight.
struct Attempt {
    state: PromotionState,
    explanation: PromotionExplanation,
}

impl Attempt {
    fn advance(
        &mut self,
        transition: impl FnOnce(PromotionState) -> PromotionResult<PromotionState>,
    ) -> PromotionResult<()> {
        let current = std::mem::take(&mut self.state);
        self.state = transition(current)?;
        self.explanation.record_state(self.state.state_name());
        Ok(())
    }
}

pub struct PromotionCoordinator {
    engine: DynEngine,
    slots: Arc<ReplicationSlotManager>,
    credentials: Credentials,
    config: PromotionConfig,
    probe_timeout: Duration,
    last: StdMutex<Option<PromotionExplanation>>,
}

impl PromotionCoordinator {
    pub fn new(
        engine: DynEngine,
        slots: Arc<ReplicationSlotManager>,
        credentials: Credentials,
        config: PromotionConfig,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            slots,
            credentials,
            config,
            probe_timeout,
            last: StdMutex::new(None),
        }
    }

    /// Explanation of the most recent attempt, whatever its outcome.
    pub fn last_explanation(&self) -> Option<PromotionExplanation> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Promote `request.candidate` and return the resulting topology.
    ///
    /// Cancellation is honored until the promotion is issued; after that
    /// the attempt runs to completion so the topology matches the cluster.
    pub async fn promote(
        &self,
        topology: &ClusterTopology,
        snapshot: Option<&HealthSnapshot>,
        request: &PromotionRequest,
        cancel: &CancelToken,
    ) -> PromotionResult<PromotionReport> {
        let mut attempt = Attempt {
            state: PromotionState::Steady,
            explanation: PromotionExplanation::begin(request, topology.primary.clone()),
        };

        tracing::info!(
            event = %Event::PromotionRequested,
            attempt = %request.attempt_id,
            candidate = %request.candidate,
            primary = %topology.primary,
            force = request.force,
            reason = request.reason.as_deref().unwrap_or(""),
            "promotion requested"
        );

        let result = self.run(&mut attempt, topology, snapshot, request, cancel).await;

        if let Err(e) = &result {
            if attempt.explanation.outcome == PromotionOutcome::Pending {
                attempt.explanation.finish(PromotionOutcome::Failed {
                    message: e.to_string(),
                });
                tracing::error!(
                    event = %Event::PromotionFailed,
                    attempt = %request.attempt_id,
                    candidate = %request.candidate,
                    state = attempt.state.state_name(),
                    code = e.code(),
                    error = %e,
                    "promotion failed"
                );
            }
        }

        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(attempt.explanation.clone());
        result.map(|topology| PromotionReport {
            topology,
            explanation: attempt.explanation,
        })
    }

    async fn run(
        &self,
        attempt: &mut Attempt,
        topology: &ClusterTopology,
        snapshot: Option<&HealthSnapshot>,
        request: &PromotionRequest,
        cancel: &CancelToken,
    ) -> PromotionResult<ClusterTopology> {
        let candidate = &request.candidate;

        attempt.advance(|s| s.request(candidate.clone()))?;
        if cancel.is_cancelled() {
            attempt.advance(PromotionState::reject_request)?;
            return Err(PromotionError::Cancelled { state: "Requested" });
        }

        // Validation
        attempt.advance(PromotionState::begin_validation)?;
        let primary_alive = self.primary_alive(topology).await;
        let validation = PromotionValidator::validate(&ValidationContext {
            topology,
            snapshot,
            candidate,
            primary_alive,
            force: request.force,
        });
        attempt.explanation.checks = validation.checks;

        if let ValidationResult::Denied(reason) = validation.result {
            attempt.advance(|s| s.deny(reason.clone()))?;
            tracing::warn!(
                event = %Event::PromotionDenied,
                attempt = %request.attempt_id,
                candidate = %candidate,
                reason = %reason,
                "promotion denied"
            );
            attempt.explanation.finish(PromotionOutcome::Denied {
                reason: reason.clone(),
            });
            attempt.advance(PromotionState::acknowledge)?;
            return Err(reason.into_error(candidate, &topology.primary));
        }
        attempt.advance(PromotionState::approve)?;

        if primary_alive {
            tracing::warn!(
                attempt = %request.attempt_id,
                primary = %topology.primary,
                "forcing promotion while the current primary still answers probes"
            );
        }

        if cancel.is_cancelled() {
            attempt.advance(PromotionState::abort)?;
            return Err(PromotionError::Cancelled { state: "Approved" });
        }

        // Promotion
        attempt.advance(PromotionState::begin_promoting)?;
        let candidate_endpoint = topology.node(candidate)?.endpoint(&self.credentials);
        tracing::info!(
            event = %Event::PromotionIssued,
            attempt = %request.attempt_id,
            candidate = %candidate,
            endpoint = %candidate_endpoint,
            "issuing promotion"
        );
        if let Err(e) = self.issue(candidate, &candidate_endpoint).await {
            attempt.advance(PromotionState::abort)?;
            return Err(e);
        }

        // Reconciliation
        attempt.advance(PromotionState::begin_reconciling)?;
        let mut next = topology.clone();
        Self::transfer_authority(&mut next, candidate)?;
        attempt.explanation.reconciliation = self.reconcile(&mut next, candidate).await?;
        next.bump();

        attempt.advance(PromotionState::complete)?;
        attempt.explanation.finish(PromotionOutcome::Succeeded);
        tracing::info!(
            event = %Event::PromotionSucceeded,
            attempt = %request.attempt_id,
            new_primary = %candidate,
            old_primary = %topology.primary,
            generation = next.generation,
            unreconciled = attempt.explanation.failed_reconciliations().count(),
            "promotion succeeded"
        );
        attempt.advance(PromotionState::acknowledge)?;
        Ok(next)
    }

    /// Whether the current primary answers a probe and is out of recovery.
    ///
    /// A server that accepts connections but rejects the status query is
    /// counted as alive.
    async fn primary_alive(&self, topology: &ClusterTopology) -> bool {
        let endpoint = match topology.primary_node() {
            Ok(node) => node.endpoint(&self.credentials),
            Err(_) => return false,
        };
        let check = async {
            self.engine.probe(&endpoint).await?;
            let rows = self.engine.execute(&endpoint, &Statement::IsInRecovery).await?;
            Ok::<bool, EngineError>(rows.scalar_bool()?)
        };
        match tokio::time::timeout(self.probe_timeout, check).await {
            Ok(Ok(in_recovery)) => !in_recovery,
            Ok(Err(e)) => !e.is_transient(),
            Err(_) => false,
        }
    }

    /// Issue the promotion and poll until the candidate leaves recovery.
    async fn issue(&self, candidate: &NodeId, endpoint: &Endpoint) -> PromotionResult<()> {
        let statement = Statement::Promote {
            wait_secs: self.config.promote_wait_secs,
        };
        let failed = |message: String| PromotionError::PromotionFailed {
            candidate: candidate.to_string(),
            message,
        };

        match self
            .engine
            .execute(endpoint, &statement)
            .await
            .and_then(|rows| rows.scalar_bool())
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(candidate = %candidate, "promotion not confirmed within wait");
            }
            Err(e) if e.is_transient() => {
                tracing::debug!(candidate = %candidate, error = %e, "promotion call interrupted");
            }
            Err(e) => return Err(failed(e.to_string())),
        }

        // Promotion has been issued; confirmation is not cancellable.
        let engine = &self.engine;
        let confirmed = retry(
            &self.config.confirm_policy(),
            &CancelToken::new(),
            EngineError::is_transient,
            |_| async move {
                let in_recovery = engine
                    .execute(endpoint, &Statement::IsInRecovery)
                    .await?
                    .scalar_bool()?;
                if in_recovery {
                    return Err(EngineError::timeout(format!("{} is still in recovery", endpoint)));
                }
                Ok::<(), EngineError>(())
            },
        )
        .await;

        match confirmed {
            Ok(()) => Ok(()),
            Err(RetryError::Exhausted { attempts, last }) => Err(failed(format!(
                "not confirmed after {} checks: {}",
                attempts, last
            ))),
            Err(RetryError::Permanent(e)) => Err(failed(e.to_string())),
            Err(RetryError::Cancelled { .. }) => Err(PromotionError::Cancelled { state: "Promoting" }),
        }
    }

    /// Make `candidate` the primary of `topology` and demote the old one.
    fn transfer_authority(topology: &mut ClusterTopology, candidate: &NodeId) -> PromotionResult<()> {
        let old_primary = topology.primary.clone();

        let node = topology.node_mut(candidate)?;
        node.transition(NodeState::Promoted)?;
        node.role = Role::Primary;
        node.upstream = None;
        node.slot_name = None;
        node.last_error = None;

        topology.replicas.retain(|id| id != candidate);
        topology.slots.retain(|_, slot| &slot.bound_node != candidate);

        let node = topology.node_mut(&old_primary)?;
        node.role = Role::Replica;
        node.upstream = None;
        node.transition(NodeState::Unreachable)?;
        node.demoted_at = Some(Utc::now());

        topology.primary = candidate.clone();
        Ok(())
    }

    /// Re-point every remaining replica at `new_primary`.
    async fn reconcile(
        &self,
        topology: &mut ClusterTopology,
        new_primary: &NodeId,
    ) -> PromotionResult<Vec<ReconcileResult>> {
        let primary_endpoint = topology.node(new_primary)?.endpoint(&self.credentials);

        let mut targets = Vec::new();
        for replica in topology.replica_nodes() {
            if let (Some(slot_name), true) = (&replica.slot_name, replica.bootstrap_complete) {
                targets.push(ReconcileTarget {
                    id: replica.id.clone(),
                    endpoint: replica.endpoint(&self.credentials),
                    slot_name: slot_name.clone(),
                    application_name: replica.application_name.clone(),
                });
            }
        }
        let pending: Vec<NodeId> = topology
            .replica_nodes()
            .filter(|r| !r.bootstrap_complete)
            .map(|r| r.id.clone())
            .collect();

        let outcomes = join_all(
            targets
                .iter()
                .map(|target| self.repoint(&primary_endpoint, target)),
        )
        .await;

        let mut results = Vec::new();
        for (target, outcome) in targets.iter().zip(outcomes) {
            let node = topology.node_mut(&target.id)?;
            match outcome {
                Ok(()) => {
                    node.upstream = Some(new_primary.clone());
                    results.push(ReconcileResult {
                        node: target.id.clone(),
                        ok: true,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        event = %Event::ReconcileFailed,
                        node = %target.id,
                        new_primary = %new_primary,
                        code = e.code(),
                        error = %e,
                        "could not re-point replica at new primary"
                    );
                    node.transition(NodeState::Unreachable)?;
                    node.record_error(format!("reconcile with {} failed: {}", new_primary, e));
                    results.push(ReconcileResult {
                        node: target.id.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        // Not yet bootstrapped: the next bootstrap streams from the new primary.
        for id in pending {
            topology.node_mut(&id)?.upstream = Some(new_primary.clone());
        }

        let listing = self.slots.list_slots(&primary_endpoint).await.ok();
        let mut slots = BTreeMap::new();
        for replica in topology.replica_nodes() {
            if let Some(name) = &replica.slot_name {
                let mut slot = ReplicationSlot::new(name.clone(), replica.id.clone());
                slot.state = listing
                    .as_deref()
                    .map(|records| observed_state(records, name))
                    .unwrap_or(SlotState::Absent);
                slots.insert(name.clone(), slot);
            }
        }
        topology.slots = slots;

        Ok(results)
    }

    async fn repoint(&self, primary: &Endpoint, target: &ReconcileTarget) -> PromotionResult<()> {
        self.slots.ensure_slot(primary, &target.slot_name).await?;

        let statements = [
            Statement::AlterSystem {
                parameter: "primary_conninfo".to_string(),
                value: primary.conninfo(&target.application_name),
            },
            Statement::AlterSystem {
                parameter: "primary_slot_name".to_string(),
                value: target.slot_name.clone(),
            },
            Statement::ReloadConf,
        ];
        for statement in &statements {
            self.engine.execute(&target.endpoint, statement).await?;
        }
        Ok(())
    }
}
