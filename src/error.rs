//! Error taxonomy shared by every component.
//!
//! Component operations return their own typed errors; each of them maps
//! onto one `ErrorClass`, which decides whether the failure is retried,
//! surfaced to the operator, or treated as fatal for the node involved.
//!
//! - `TransientNetwork`: retried with bounded backoff, surfaced only once
//!   the retry budget is exhausted
//! - `ResourceConflict`: surfaced immediately, never retried
//! - `PreconditionFailed`: surfaced, operator must act
//! - `IrrecoverableState`: fatal for the node, requires operator intervention

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::config::ConfigError;
use crate::health::HealthError;
use crate::promotion::PromotionError;
use crate::slots::SlotError;
use crate::topology::{StoreError, TopologyError};

/// Classification of every failure the control plane can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    /// Network blip or timeout; safe to retry.
    TransientNetwork,
    /// Another actor holds the resource (slot in use, promotion running).
    ResourceConflict,
    /// The request is not allowed in the current cluster state.
    PreconditionFailed,
    /// Node data or state cannot be repaired automatically.
    IrrecoverableState,
    /// Invalid configuration or request shape.
    Configuration,
    /// Caller cancelled the operation at a checkpoint boundary.
    Cancelled,
    /// Local failure of the control plane itself (I/O, serialization).
    Internal,
}

impl ErrorClass {
    /// Returns the string representation used in structured output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientNetwork => "TransientNetworkError",
            ErrorClass::ResourceConflict => "ResourceConflict",
            ErrorClass::PreconditionFailed => "PreconditionFailed",
            ErrorClass::IrrecoverableState => "IrrecoverableState",
            ErrorClass::Configuration => "Configuration",
            ErrorClass::Cancelled => "Cancelled",
            ErrorClass::Internal => "Internal",
        }
    }

    /// Whether a failure of this class may be retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::TransientNetwork)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the external control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    Promotion(#[from] PromotionError),

    /// Another topology mutation holds the exclusive guard.
    #[error("topology mutation already in progress")]
    PromotionInProgress,
}

impl ControlError {
    /// Error class of the underlying failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            ControlError::Config(e) => e.class(),
            ControlError::Topology(e) => e.class(),
            ControlError::Store(e) => e.class(),
            ControlError::Slot(e) => e.class(),
            ControlError::Bootstrap(e) => e.class(),
            ControlError::Health(e) => e.class(),
            ControlError::Promotion(e) => e.class(),
            ControlError::PromotionInProgress => ErrorClass::ResourceConflict,
        }
    }

    /// Stable error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Config(e) => e.code(),
            ControlError::Topology(e) => e.code(),
            ControlError::Store(e) => e.code(),
            ControlError::Slot(e) => e.code(),
            ControlError::Bootstrap(e) => e.code(),
            ControlError::Health(e) => e.code(),
            ControlError::Promotion(e) => e.code(),
            ControlError::PromotionInProgress => "REPL_PROMOTION_IN_PROGRESS",
        }
    }
}

/// Result type for the control surface
pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorClass::TransientNetwork.is_retryable());
        assert!(!ErrorClass::ResourceConflict.is_retryable());
        assert!(!ErrorClass::PreconditionFailed.is_retryable());
        assert!(!ErrorClass::IrrecoverableState.is_retryable());
        assert!(!ErrorClass::Cancelled.is_retryable());
    }

    #[test]
    fn test_promotion_in_progress_is_conflict() {
        let err = ControlError::PromotionInProgress;
        assert_eq!(err.class(), ErrorClass::ResourceConflict);
        assert_eq!(err.code(), "REPL_PROMOTION_IN_PROGRESS");
    }
}
