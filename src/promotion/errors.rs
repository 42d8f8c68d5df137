//! Promotion Error Types
//!
//! If promotion safety cannot be established the request is refused.
//! Explicit failure is preferred over unsafe success, and no promotion
//! failure is retried automatically.

use thiserror::Error;

use crate::engine::EngineError;
use crate::error::ErrorClass;
use crate::slots::SlotError;
use crate::topology::TopologyError;

/// Errors raised by the promotion coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PromotionError {
    /// Candidate is unknown, not a replica, or never finished bootstrap
    #[error("invalid promotion candidate {candidate}: {reason}")]
    InvalidCandidate { candidate: String, reason: String },

    /// Candidate is not Healthy or Lagging
    #[error("promotion candidate {candidate} is not healthy: {detail}")]
    CandidateNotHealthy { candidate: String, detail: String },

    /// The current primary still answers probes and force was not set
    #[error("current primary {primary} is still reachable; refusing promotion without force")]
    StalePrimaryStillAlive { primary: String },

    /// Promotion was issued but never confirmed by the candidate
    #[error("promotion of {candidate} failed: {message}")]
    PromotionFailed { candidate: String, message: String },

    #[error("promotion cancelled in state {state}")]
    Cancelled { state: &'static str },

    #[error("forbidden promotion transition: {from} -> {to}")]
    ForbiddenTransition { from: &'static str, to: &'static str },

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Slot(#[from] SlotError),
}

impl PromotionError {
    pub fn forbidden_transition(from: &'static str, to: &'static str) -> Self {
        PromotionError::ForbiddenTransition { from, to }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PromotionError::InvalidCandidate { .. }
            | PromotionError::CandidateNotHealthy { .. }
            | PromotionError::StalePrimaryStillAlive { .. } => ErrorClass::PreconditionFailed,
            PromotionError::PromotionFailed { .. } => ErrorClass::IrrecoverableState,
            PromotionError::Cancelled { .. } => ErrorClass::Cancelled,
            PromotionError::ForbiddenTransition { .. } => ErrorClass::Internal,
            PromotionError::Topology(e) => e.class(),
            PromotionError::Engine(e) => e.class(),
            PromotionError::Slot(e) => e.class(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PromotionError::InvalidCandidate { .. } => "REPL_INVALID_CANDIDATE",
            PromotionError::CandidateNotHealthy { .. } => "REPL_CANDIDATE_NOT_HEALTHY",
            PromotionError::StalePrimaryStillAlive { .. } => "REPL_STALE_PRIMARY_STILL_ALIVE",
            PromotionError::PromotionFailed { .. } => "REPL_PROMOTION_FAILED",
            PromotionError::Cancelled { .. } => "REPL_PROMOTION_CANCELLED",
            PromotionError::ForbiddenTransition { .. } => "REPL_PROMOTION_FORBIDDEN_TRANSITION",
            PromotionError::Topology(e) => e.code(),
            PromotionError::Engine(e) => e.code(),
            PromotionError::Slot(e) => e.code(),
        }
    }
}

/// Result type for promotion operations
pub type PromotionResult<T> = Result<T, PromotionError>;
