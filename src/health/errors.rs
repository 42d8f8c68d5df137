//! Health Monitor Error Types

use thiserror::Error;

use crate::error::ErrorClass;

/// Errors raised by the health monitor.
///
/// Per-node probe failures are not errors: they are recorded in the
/// snapshot. Only a topology the monitor cannot sample at all fails a poll.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("topology has no primary node {0}")]
    MissingPrimary(String),

    #[error("no health snapshot taken yet")]
    NoSnapshot,
}

impl HealthError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HealthError::MissingPrimary(_) => ErrorClass::Internal,
            HealthError::NoSnapshot => ErrorClass::PreconditionFailed,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            HealthError::MissingPrimary(_) => "REPL_HEALTH_MISSING_PRIMARY",
            HealthError::NoSnapshot => "REPL_HEALTH_NO_SNAPSHOT",
        }
    }
}

/// Result type for health operations
pub type HealthResult<T> = Result<T, HealthError>;
