//! Bootstrap Error Types

use thiserror::Error;

use super::checkpoint::BootstrapPhase;
use crate::engine::EngineError;
use crate::error::ErrorClass;

/// Errors raised while bootstrapping a replica.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootstrapError {
    /// The primary never became reachable within the retry budget
    #[error("primary unreachable after {attempts} attempts: {last}")]
    PrimaryUnreachable { attempts: u32, last: String },

    /// A base backup attempt failed; the next bootstrap starts over from a clean slate
    #[error("base backup attempt {attempt} failed: {source}")]
    BaseBackupFailed { attempt: u32, source: EngineError },

    /// Base backups failed too often; operator intervention required
    #[error("replica {node} is irrecoverable after {attempts} failed base backups: {last}")]
    Irrecoverable {
        node: String,
        attempts: u32,
        last: String,
    },

    /// Permanent engine failure (credentials, missing tools, missing slot)
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("bootstrap cancelled before {phase:?}")]
    Cancelled { phase: BootstrapPhase },

    /// Local filesystem failure on the replica data directory
    #[error("bootstrap I/O failed: {0}")]
    Io(String),

    #[error("bootstrap checkpoint unusable: {0}")]
    Checkpoint(String),
}

impl BootstrapError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BootstrapError::PrimaryUnreachable { .. } => ErrorClass::TransientNetwork,
            BootstrapError::BaseBackupFailed { .. } => ErrorClass::TransientNetwork,
            BootstrapError::Irrecoverable { .. } => ErrorClass::IrrecoverableState,
            BootstrapError::Engine(e) => e.class(),
            BootstrapError::Cancelled { .. } => ErrorClass::Cancelled,
            BootstrapError::Io(_) => ErrorClass::Internal,
            BootstrapError::Checkpoint(_) => ErrorClass::IrrecoverableState,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BootstrapError::PrimaryUnreachable { .. } => "REPL_PRIMARY_UNREACHABLE",
            BootstrapError::BaseBackupFailed { .. } => "REPL_BASE_BACKUP_FAILED",
            BootstrapError::Irrecoverable { .. } => "REPL_BOOTSTRAP_IRRECOVERABLE",
            BootstrapError::Engine(e) => e.code(),
            BootstrapError::Cancelled { .. } => "REPL_BOOTSTRAP_CANCELLED",
            BootstrapError::Io(_) => "REPL_BOOTSTRAP_IO",
            BootstrapError::Checkpoint(_) => "REPL_BOOTSTRAP_CHECKPOINT",
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(e: std::io::Error) -> Self {
        BootstrapError::Io(e.to_string())
    }
}

/// Result type for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;
