//! Promotion State Machine
//!
//! - States are explicit and enumerable
//! - Transitions are request-driven, never inferred
//! - Every forbidden transition is an error
//!
//! ```text
//! Steady → Requested → Validating → Approved → Promoting → Reconciling → Succeeded → Steady
//!              │            └──────→ Denied ──────────────────────────────────────→ Steady
//!              └─ rejected → Steady            Approved | Promoting ─ aborted ───→ Steady
//! ```
//!
//! Nothing before `Promoting` has an effect on the cluster; an attempt
//! abandoned there is simply forgotten.

use std::fmt;

use serde::Serialize;

use super::errors::{PromotionError, PromotionResult};
use crate::health::HealthClass;
use crate::topology::NodeId;

/// Reason a promotion was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DenialReason {
    /// Candidate is not part of the topology
    UnknownCandidate,
    /// Candidate is the primary, decommissioned, or otherwise not a live replica
    NotAReplica,
    /// Candidate never completed bootstrap
    NotBootstrapped,
    /// Candidate is not streaming from the primary
    NotReplicating,
    /// No health sample exists for the candidate
    NoHealthSample,
    /// Candidate's last health classification forbids promotion
    CandidateNotHealthy(HealthClass),
    /// The current primary still answers probes and force was not set
    PrimaryStillAlive,
}

impl DenialReason {
    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::UnknownCandidate => "candidate is not part of the topology".into(),
            Self::NotAReplica => "candidate is not a live replica".into(),
            Self::NotBootstrapped => "candidate has not completed bootstrap".into(),
            Self::NotReplicating => "candidate is not streaming from the primary".into(),
            Self::NoHealthSample => "no health sample exists for the candidate".into(),
            Self::CandidateNotHealthy(class) => {
                format!("candidate is classified {}", class)
            }
            Self::PrimaryStillAlive => {
                "current primary is still reachable; promotion would create two primaries".into()
            }
        }
    }

    /// Convert into the error surfaced to the caller.
    pub fn into_error(self, candidate: &NodeId, primary: &NodeId) -> PromotionError {
        match self {
            Self::UnknownCandidate | Self::NotAReplica | Self::NotBootstrapped => {
                PromotionError::InvalidCandidate {
                    candidate: candidate.to_string(),
                    reason: self.description(),
                }
            }
            Self::NotReplicating | Self::NoHealthSample | Self::CandidateNotHealthy(_) => {
                PromotionError::CandidateNotHealthy {
                    candidate: candidate.to_string(),
                    detail: self.description(),
                }
            }
            Self::PrimaryStillAlive => PromotionError::StalePrimaryStillAlive {
                primary: primary.to_string(),
            },
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Promotion attempt state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionState {
    /// No promotion attempt in progress.
    Steady,

    /// An explicit promotion request has been issued.
    Requested { candidate: NodeId },

    /// Preconditions are being checked. No cluster effect yet.
    Validating { candidate: NodeId },

    /// Preconditions hold. Approval alone has no effect.
    Approved { candidate: NodeId },

    /// Preconditions failed.
    Denied {
        candidate: NodeId,
        reason: DenialReason,
    },

    /// The promotion action was issued to the candidate.
    Promoting { candidate: NodeId },

    /// Candidate confirmed as primary; remaining replicas being re-pointed.
    Reconciling { new_primary: NodeId },

    /// Promotion completed.
    Succeeded { new_primary: NodeId },
}

impl Default for PromotionState {
    fn default() -> Self {
        Self::Steady
    }
}

impl PromotionState {
    /// Get the state name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Steady => "Steady",
            Self::Requested { .. } => "Requested",
            Self::Validating { .. } => "Validating",
            Self::Approved { .. } => "Approved",
            Self::Denied { .. } => "Denied",
            Self::Promoting { .. } => "Promoting",
            Self::Reconciling { .. } => "Reconciling",
            Self::Succeeded { .. } => "Succeeded",
        }
    }

    /// Whether the cluster has been affected by this attempt.
    pub fn has_effect(&self) -> bool {
        matches!(
            self,
            Self::Promoting { .. } | Self::Reconciling { .. } | Self::Succeeded { .. }
        )
    }

    // =========================================================================
    // ALLOWED TRANSITIONS
    // =========================================================================

    /// Steady → Requested
    pub fn request(self, candidate: NodeId) -> PromotionResult<Self> {
        match self {
            Self::Steady => Ok(Self::Requested { candidate }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Requested")),
        }
    }

    /// Requested → Steady (request malformed before validation)
    pub fn reject_request(self) -> PromotionResult<Self> {
        match self {
            Self::Requested { .. } => Ok(Self::Steady),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Steady")),
        }
    }

    /// Requested → Validating
    pub fn begin_validation(self) -> PromotionResult<Self> {
        match self {
            Self::Requested { candidate } => Ok(Self::Validating { candidate }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Validating")),
        }
    }

    /// Validating → Approved
    pub fn approve(self) -> PromotionResult<Self> {
        match self {
            Self::Validating { candidate } => Ok(Self::Approved { candidate }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Approved")),
        }
    }

    /// Validating → Denied
    pub fn deny(self, reason: DenialReason) -> PromotionResult<Self> {
        match self {
            Self::Validating { candidate } => Ok(Self::Denied { candidate, reason }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Denied")),
        }
    }

    /// Approved → Promoting
    pub fn begin_promoting(self) -> PromotionResult<Self> {
        match self {
            Self::Approved { candidate } => Ok(Self::Promoting { candidate }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Promoting")),
        }
    }

    /// Promoting → Reconciling
    pub fn begin_reconciling(self) -> PromotionResult<Self> {
        match self {
            Self::Promoting { candidate } => Ok(Self::Reconciling {
                new_primary: candidate,
            }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Reconciling")),
        }
    }

    /// Reconciling → Succeeded
    pub fn complete(self) -> PromotionResult<Self> {
        match self {
            Self::Reconciling { new_primary } => Ok(Self::Succeeded { new_primary }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Succeeded")),
        }
    }

    /// Approved | Promoting → Steady (cancelled, or the candidate never confirmed)
    pub fn abort(self) -> PromotionResult<Self> {
        match self {
            Self::Approved { .. } | Self::Promoting { .. } => Ok(Self::Steady),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Steady")),
        }
    }

    /// Succeeded | Denied → Steady
    pub fn acknowledge(self) -> PromotionResult<Self> {
        match self {
            Self::Succeeded { .. } | Self::Denied { .. } => Ok(Self::Steady),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Steady")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> NodeId {
        NodeId::from("replica_1")
    }

    // =========================================================================
    // ALLOWED TRANSITION TESTS
    // =========================================================================

    #[test]
    fn test_full_success_path() {
        let state = PromotionState::Steady
            .request(candidate())
            .and_then(PromotionState::begin_validation)
            .and_then(PromotionState::approve)
            .and_then(PromotionState::begin_promoting)
            .and_then(PromotionState::begin_reconciling)
            .and_then(PromotionState::complete)
            .unwrap();
        assert_eq!(
            state,
            PromotionState::Succeeded {
                new_primary: candidate()
            }
        );
        assert_eq!(state.acknowledge().unwrap(), PromotionState::Steady);
    }

    #[test]
    fn test_denial_path() {
        let state = PromotionState::Steady
            .request(candidate())
            .and_then(PromotionState::begin_validation)
            .and_then(|s| s.deny(DenialReason::PrimaryStillAlive))
            .unwrap();
        assert_eq!(state.state_name(), "Denied");
        assert!(!state.has_effect());
        assert_eq!(state.acknowledge().unwrap(), PromotionState::Steady);
    }

    #[test]
    fn test_abort_from_promoting() {
        let state = PromotionState::Promoting {
            candidate: candidate(),
        };
        assert!(state.has_effect());
        assert_eq!(state.abort().unwrap(), PromotionState::Steady);
    }

    // =========================================================================
    // FORBIDDEN TRANSITION TESTS
    // =========================================================================

    #[test]
    fn test_cannot_skip_validation() {
        let state = PromotionState::Requested {
            candidate: candidate(),
        };
        assert!(state.approve().is_err());
    }

    #[test]
    fn test_cannot_request_twice() {
        let state = PromotionState::Validating {
            candidate: candidate(),
        };
        let err = state.request(candidate()).unwrap_err();
        assert_eq!(err.code(), "REPL_PROMOTION_FORBIDDEN_TRANSITION");
    }

    #[test]
    fn test_cannot_abort_after_reconciling() {
        let state = PromotionState::Reconciling {
            new_primary: candidate(),
        };
        assert!(state.abort().is_err());
    }

    #[test]
    fn test_denial_maps_to_error() {
        let err = DenialReason::PrimaryStillAlive
            .into_error(&candidate(), &NodeId::from("primary"));
        assert_eq!(err.code(), "REPL_STALE_PRIMARY_STILL_ALIVE");

        let err = DenialReason::CandidateNotHealthy(HealthClass::Unreachable)
            .into_error(&candidate(), &NodeId::from("primary"));
        assert!(matches!(err, PromotionError::CandidateNotHealthy { .. }));
    }
}
