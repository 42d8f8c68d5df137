//! Promotion Explanation
//!
//! Every promotion attempt produces an explanation record: who was asked to
//! be promoted, which checks ran, what was decided, and how each remaining
//! replica was reconciled afterwards.
//!
//! The explanation DESCRIBES what happened; it never DECIDES what happens.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::request::PromotionRequest;
use super::state::DenialReason;
use super::validator::ValidationCheck;
use crate::topology::NodeId;

/// Outcome of a promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionOutcome {
    /// Still running
    Pending,
    Succeeded,
    Denied { reason: DenialReason },
    /// Failed or cancelled after approval
    Failed { message: String },
}

/// Reconciliation result for one remaining replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub node: NodeId,
    pub ok: bool,
    pub error: Option<String>,
}

/// Explanation artifact for one promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionExplanation {
    pub attempt_id: Uuid,
    pub candidate: NodeId,
    pub previous_primary: NodeId,
    pub force: bool,
    pub reason: Option<String>,
    pub outcome: PromotionOutcome,
    pub checks: Vec<ValidationCheck>,
    pub reconciliation: Vec<ReconcileResult>,
    /// Promotion states visited, in order
    pub states: Vec<&'static str>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PromotionExplanation {
    pub fn begin(request: &PromotionRequest, previous_primary: NodeId) -> Self {
        Self {
            attempt_id: request.attempt_id,
            candidate: request.candidate.clone(),
            previous_primary,
            force: request.force,
            reason: request.reason.clone(),
            outcome: PromotionOutcome::Pending,
            checks: Vec::new(),
            reconciliation: Vec::new(),
            states: vec!["Steady"],
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_state(&mut self, state: &'static str) {
        self.states.push(state);
    }

    pub fn finish(&mut self, outcome: PromotionOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    /// Replicas whose upstream could not be re-pointed.
    pub fn failed_reconciliations(&self) -> impl Iterator<Item = &ReconcileResult> {
        self.reconciliation.iter().filter(|r| !r.ok)
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        match &self.outcome {
            PromotionOutcome::Pending => format!("promotion of {} in progress", self.candidate),
            PromotionOutcome::Succeeded => {
                let failed = self.failed_reconciliations().count();
                format!(
                    "{} promoted (was {}); {} of {} replicas reconciled",
                    self.candidate,
                    self.previous_primary,
                    self.reconciliation.len() - failed,
                    self.reconciliation.len()
                )
            }
            PromotionOutcome::Denied { reason } => {
                format!("promotion of {} denied: {}", self.candidate, reason)
            }
            PromotionOutcome::Failed { message } => {
                format!("promotion of {} failed: {}", self.candidate, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_reconciliation() {
        let request = PromotionRequest::new(NodeId::from("replica_1"));
        let mut explanation = PromotionExplanation::begin(&request, NodeId::from("primary"));
        explanation.reconciliation.push(ReconcileResult {
            node: NodeId::from("replica_2"),
            ok: true,
            error: None,
        });
        explanation.reconciliation.push(ReconcileResult {
            node: NodeId::from("replica_3"),
            ok: false,
            error: Some("connection refused".into()),
        });
        explanation.finish(PromotionOutcome::Succeeded);

        assert_eq!(
            explanation.summary(),
            "replica_1 promoted (was primary); 1 of 2 replicas reconciled"
        );
        assert!(explanation.finished_at.is_some());
    }

    #[test]
    fn test_serializes_outcome_tag() {
        let request = PromotionRequest::new(NodeId::from("replica_1"));
        let mut explanation = PromotionExplanation::begin(&request, NodeId::from("primary"));
        explanation.finish(PromotionOutcome::Denied {
            reason: DenialReason::PrimaryStillAlive,
        });
        let json = serde_json::to_value(&explanation).unwrap();
        assert_eq!(json["outcome"]["outcome"], "denied");
        assert_eq!(json["outcome"]["reason"], "PrimaryStillAlive");
    }
}
