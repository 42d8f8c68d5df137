//! CLI-specific error types
//!
//! Control-plane errors keep their own code and class; the CLI only adds
//! codes for failures that happen before a controller exists.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::error::{ControlError, ErrorClass};

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// I/O error (stdout, state directory)
    IoError,
    /// `init` on a cluster that already has a topology
    AlreadyInitialized,
    /// Any command other than `init` before the cluster was initialized
    NotInitialized,
    /// Error raised by the control plane
    Control(&'static str),
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::IoError => "REPL_CLI_IO_ERROR",
            Self::AlreadyInitialized => "REPL_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "REPL_CLI_NOT_INITIALIZED",
            Self::Control(code) => code,
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    class: ErrorClass,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            code,
            class,
            message: message.into(),
        }
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, ErrorClass::Internal, msg)
    }

    pub fn already_initialized(cluster: &str) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            ErrorClass::PreconditionFailed,
            format!("cluster '{}' is already initialized", cluster),
        )
    }

    pub fn not_initialized(cluster: &str) -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            ErrorClass::PreconditionFailed,
            format!("cluster '{}' is not initialized; run `replctl init` first", cluster),
        )
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<ControlError> for CliError {
    fn from(err: ControlError) -> Self {
        Self::new(CliErrorCode::Control(err.code()), err.class(), err.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        ControlError::from(err).into()
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::io_error(err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", err))
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlError;

    #[test]
    fn test_control_error_keeps_code_and_class() {
        let err: CliError = ControlError::PromotionInProgress.into();
        assert_eq!(err.code().code(), ControlError::PromotionInProgress.code());
        assert_eq!(err.class(), ErrorClass::ResourceConflict);
    }

    #[test]
    fn test_display_includes_code() {
        let err = CliError::not_initialized("main");
        assert!(err.to_string().starts_with("REPL_CLI_NOT_INITIALIZED"));
    }
}
