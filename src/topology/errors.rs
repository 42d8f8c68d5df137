//! Topology Error Types

use thiserror::Error;

use crate::error::ErrorClass;

/// Errors raised by topology mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node already exists: {0}")]
    DuplicateNode(String),

    #[error("slot name already bound: {0}")]
    DuplicateSlot(String),

    #[error("node {0} is not a replica")]
    NotAReplica(String),

    #[error("forbidden transition for {node}: {from} -> {to}")]
    ForbiddenTransition {
        node: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("topology invariant violated: {0}")]
    InvariantViolation(String),
}

impl TopologyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TopologyError::UnknownNode(_) | TopologyError::NotAReplica(_) => {
                ErrorClass::PreconditionFailed
            }
            TopologyError::DuplicateNode(_) | TopologyError::DuplicateSlot(_) => {
                ErrorClass::ResourceConflict
            }
            TopologyError::ForbiddenTransition { .. } => ErrorClass::PreconditionFailed,
            TopologyError::InvariantViolation(_) => ErrorClass::IrrecoverableState,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TopologyError::UnknownNode(_) => "REPL_UNKNOWN_NODE",
            TopologyError::DuplicateNode(_) => "REPL_DUPLICATE_NODE",
            TopologyError::DuplicateSlot(_) => "REPL_DUPLICATE_SLOT",
            TopologyError::NotAReplica(_) => "REPL_NOT_A_REPLICA",
            TopologyError::ForbiddenTransition { .. } => "REPL_FORBIDDEN_TRANSITION",
            TopologyError::InvariantViolation(_) => "REPL_TOPOLOGY_INVARIANT",
        }
    }
}

/// Result type for topology mutations
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors raised by topology persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("topology store I/O failed: {0}")]
    Io(String),

    #[error("persisted topology is corrupt: {0}")]
    Corrupt(String),

    #[error("persisted topology belongs to cluster '{found}', expected '{expected}'")]
    ClusterMismatch { expected: String, found: String },
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::Io(_) => ErrorClass::Internal,
            StoreError::Corrupt(_) => ErrorClass::IrrecoverableState,
            StoreError::ClusterMismatch { .. } => ErrorClass::Configuration,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "REPL_STORE_IO",
            StoreError::Corrupt(_) => "REPL_STORE_CORRUPT",
            StoreError::ClusterMismatch { .. } => "REPL_STORE_CLUSTER_MISMATCH",
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Result type for topology persistence
pub type StoreResult<T> = Result<T, StoreError>;
