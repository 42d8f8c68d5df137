//! Slot Manager Error Types

use thiserror::Error;

use crate::engine::EngineError;
use crate::error::ErrorClass;

/// Errors raised by the replication slot manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SlotError {
    /// A replica is streaming from the slot and `force` was not set
    #[error("replication slot {0} is in use by an active consumer")]
    SlotInUse(String),

    #[error("replication slot {0} does not exist")]
    NotFound(String),

    #[error("invalid replication slot name: {0}")]
    InvalidName(String),

    /// A slot with this name exists but is not physical
    #[error("replication slot {name} exists with kind {kind}")]
    WrongKind { name: String, kind: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SlotError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SlotError::SlotInUse(_) | SlotError::WrongKind { .. } => ErrorClass::ResourceConflict,
            SlotError::NotFound(_) => ErrorClass::PreconditionFailed,
            SlotError::InvalidName(_) => ErrorClass::Configuration,
            SlotError::Engine(e) => e.class(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SlotError::SlotInUse(_) => "REPL_SLOT_IN_USE",
            SlotError::NotFound(_) => "REPL_SLOT_NOT_FOUND",
            SlotError::InvalidName(_) => "REPL_SLOT_INVALID_NAME",
            SlotError::WrongKind { .. } => "REPL_SLOT_WRONG_KIND",
            SlotError::Engine(e) => e.code(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SlotError::Engine(e) if e.is_transient())
    }
}

/// Result type for slot operations
pub type SlotResult<T> = Result<T, SlotError>;
