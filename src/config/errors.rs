//! Configuration errors
//!
//! All configuration errors are detected at load time and are fatal for
//! the command being run.

use thiserror::Error;

use crate::error::ErrorClass;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),

    #[error("invalid config JSON: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("duplicate slot name: {0}")]
    DuplicateSlot(String),

    #[error("invalid slot name '{0}': must match [a-z0-9_]{{1,63}}")]
    InvalidSlotName(String),
}

impl ConfigError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConfigError::Read(_) => ErrorClass::Internal,
            _ => ErrorClass::Configuration,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read(_) => "REPL_CONFIG_READ",
            ConfigError::Parse(_) => "REPL_CONFIG_PARSE",
            ConfigError::Invalid(_) => "REPL_CONFIG_INVALID",
            ConfigError::DuplicateNode(_) => "REPL_CONFIG_DUPLICATE_NODE",
            ConfigError::DuplicateSlot(_) => "REPL_CONFIG_DUPLICATE_SLOT",
            ConfigError::InvalidSlotName(_) => "REPL_CONFIG_INVALID_SLOT_NAME",
        }
    }
}
