//! Engine Error Types
//!
//! Errors reported by the database engine boundary. Only `Unreachable`
//! and `Timeout` are transient; every other kind is permanent and must
//! never be retried automatically.

use std::fmt;

use crate::error::ErrorClass;

/// Engine error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Error kind
    pub kind: EngineErrorKind,
    /// Error message
    pub message: String,
}

/// Engine error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Server did not accept the connection
    Unreachable,

    /// Call did not finish within its time bound
    Timeout,

    /// Credentials rejected
    Authentication,

    /// Object (slot) already exists
    AlreadyExists,

    /// Object (slot) does not exist
    NotFound,

    /// Object is held by an active consumer
    ObjectInUse,

    /// Statement failed on the server
    QueryFailed,

    /// Physical base backup failed
    BackupFailed,

    /// Client tool could not be launched
    ToolMissing,

    /// Unexpected result shape
    Protocol,
}

impl EngineError {
    /// Create a new engine error.
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unreachable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Timeout, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Authentication, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Protocol, message)
    }

    /// Check if this error may clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            EngineErrorKind::Unreachable | EngineErrorKind::Timeout
        )
    }

    /// Map onto the control-plane error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self.kind {
            EngineErrorKind::Unreachable | EngineErrorKind::Timeout => {
                ErrorClass::TransientNetwork
            }
            EngineErrorKind::AlreadyExists | EngineErrorKind::ObjectInUse => {
                ErrorClass::ResourceConflict
            }
            EngineErrorKind::NotFound => ErrorClass::PreconditionFailed,
            EngineErrorKind::Authentication | EngineErrorKind::ToolMissing => {
                ErrorClass::Configuration
            }
            EngineErrorKind::BackupFailed => ErrorClass::IrrecoverableState,
            EngineErrorKind::QueryFailed | EngineErrorKind::Protocol => ErrorClass::Internal,
        }
    }

    /// Stable code for structured output.
    pub fn code(&self) -> &'static str {
        match self.kind {
            EngineErrorKind::Unreachable => "REPL_ENGINE_UNREACHABLE",
            EngineErrorKind::Timeout => "REPL_ENGINE_TIMEOUT",
            EngineErrorKind::Authentication => "REPL_ENGINE_AUTH",
            EngineErrorKind::AlreadyExists => "REPL_ENGINE_ALREADY_EXISTS",
            EngineErrorKind::NotFound => "REPL_ENGINE_NOT_FOUND",
            EngineErrorKind::ObjectInUse => "REPL_ENGINE_OBJECT_IN_USE",
            EngineErrorKind::QueryFailed => "REPL_ENGINE_QUERY_FAILED",
            EngineErrorKind::BackupFailed => "REPL_ENGINE_BACKUP_FAILED",
            EngineErrorKind::ToolMissing => "REPL_ENGINE_TOOL_MISSING",
            EngineErrorKind::Protocol => "REPL_ENGINE_PROTOCOL",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
