//! Promotion Validation
//!
//! Evaluates whether a promotion is allowed and produces an explicit
//! allow/deny decision together with every check that was evaluated.
//!
//! Validator logic is deterministic and side-effect free. The liveness of
//! the current primary is probed by the coordinator and handed in as input.

use serde::Serialize;

use super::state::DenialReason;
use crate::health::HealthSnapshot;
use crate::topology::{ClusterTopology, NodeId, Role};

/// Result of promotion validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Promotion is allowed.
    Allowed,

    /// Promotion is denied with explicit reason.
    Denied(DenialReason),
}

impl ValidationResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            Self::Denied(reason) => Some(reason),
            Self::Allowed => None,
        }
    }
}

/// One evaluated precondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl ValidationCheck {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Input context for promotion validation.
pub struct ValidationContext<'a> {
    pub topology: &'a ClusterTopology,

    /// Last health snapshot, if any cycle has run
    pub snapshot: Option<&'a HealthSnapshot>,

    pub candidate: &'a NodeId,

    /// Whether the current primary answered a live probe just now
    pub primary_alive: bool,

    /// Whether force flag is set on the request
    pub force: bool,
}

/// Ordered list of checks and the decision they led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub checks: Vec<ValidationCheck>,
    pub result: ValidationResult,
}

/// Promotion Validator
///
/// Checks, in order, stopping at the first failure:
/// 1. candidate is part of the topology
/// 2. candidate is a live replica
/// 3. candidate completed bootstrap
/// 4. candidate is streaming (Streaming or Lagging)
/// 5. candidate's last health class is Healthy or Lagging
/// 6. current primary is not reachable, unless forced
pub struct PromotionValidator;

impl PromotionValidator {
    pub fn validate(context: &ValidationContext<'_>) -> Validation {
        let mut checks = Vec::new();
        let result = Self::run_checks(context, &mut checks);
        Validation { checks, result }
    }

    fn run_checks(
        context: &ValidationContext<'_>,
        checks: &mut Vec<ValidationCheck>,
    ) -> ValidationResult {
        let candidate = context.candidate;

        // Check 1: candidate is known
        let node = match context.topology.nodes.get(candidate) {
            Some(node) => {
                checks.push(ValidationCheck::pass("candidate_known", candidate.as_str()));
                node
            }
            None => {
                checks.push(ValidationCheck::fail(
                    "candidate_known",
                    format!("{} is not in the topology", candidate),
                ));
                return ValidationResult::Denied(DenialReason::UnknownCandidate);
            }
        };

        // Check 2: candidate is a live replica, not the primary
        if node.role != Role::Replica || !node.is_active() || candidate == &context.topology.primary
        {
            checks.push(ValidationCheck::fail(
                "candidate_is_replica",
                format!("role {}, state {}", node.role, node.state),
            ));
            return ValidationResult::Denied(DenialReason::NotAReplica);
        }
        checks.push(ValidationCheck::pass("candidate_is_replica", node.state.as_str()));

        // Check 3: bootstrap finished
        if !node.bootstrap_complete {
            checks.push(ValidationCheck::fail("candidate_bootstrapped", "bootstrap incomplete"));
            return ValidationResult::Denied(DenialReason::NotBootstrapped);
        }
        checks.push(ValidationCheck::pass("candidate_bootstrapped", "bootstrap complete"));

        // Check 4: recorded state
        if !node.state.is_replicating() {
            checks.push(ValidationCheck::fail("candidate_streaming", node.state.as_str()));
            return ValidationResult::Denied(DenialReason::NotReplicating);
        }
        checks.push(ValidationCheck::pass("candidate_streaming", node.state.as_str()));

        // Check 5: health classification
        let class = match context.snapshot.and_then(|s| s.class_of(candidate)) {
            Some(class) => class,
            None => {
                checks.push(ValidationCheck::fail("candidate_health", "no health sample"));
                return ValidationResult::Denied(DenialReason::NoHealthSample);
            }
        };
        if !class.is_promotable() {
            checks.push(ValidationCheck::fail("candidate_health", class.as_str()));
            return ValidationResult::Denied(DenialReason::CandidateNotHealthy(class));
        }
        checks.push(ValidationCheck::pass("candidate_health", class.as_str()));

        // Check 6: single write authority
        match (context.primary_alive, context.force) {
            (false, _) => {
                checks.push(ValidationCheck::pass("primary_unreachable", "primary did not answer"));
            }
            (true, true) => {
                checks.push(ValidationCheck::pass(
                    "primary_unreachable",
                    "primary still answers; overridden by force",
                ));
            }
            (true, false) => {
                checks.push(ValidationCheck::fail("primary_unreachable", "primary still answers"));
                return ValidationResult::Denied(DenialReason::PrimaryStillAlive);
            }
        }

        ValidationResult::Allowed
    }

    /// One-line explanation of a decision.
    pub fn explain(result: &ValidationResult) -> String {
        match result {
            ValidationResult::Allowed => "promotion allowed: all preconditions hold".to_string(),
            ValidationResult::Denied(reason) => {
                format!("promotion denied: {}", reason.description())
            }
        }
    }
}
