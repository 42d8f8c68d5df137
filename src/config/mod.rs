//! Cluster configuration
//!
//! One JSON document describes the desired topology and every tunable the
//! components need. It is loaded and validated once, then shared immutably
//! (`Arc<ClusterConfig>`) with each component at construction. Components
//! never read environment variables or fixed paths.

mod errors;

pub use errors::{ConfigError, ConfigResult};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::topology::NodeId;

/// Maximum identifier length accepted by the engine for slot names.
pub const MAX_SLOT_NAME_LEN: usize = 63;

/// Default engine port.
pub const DEFAULT_PORT: u16 = 5432;

/// Top-level configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name, used in logs and as the topology identity
    pub cluster_name: String,

    /// Directory holding the persisted topology and bootstrap checkpoints
    pub state_dir: PathBuf,

    /// Replication credentials shared by every node
    pub credentials: Credentials,

    /// Initial primary
    pub primary: PrimaryConfig,

    /// Desired replicas
    #[serde(default)]
    pub replicas: Vec<ReplicaConfig>,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub promotion: PromotionConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Connection credentials for the replication user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "postgres".to_string()
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Primary node definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryConfig {
    pub id: NodeId,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Replica node definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub id: NodeId,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Data directory the base backup is written into
    pub data_dir: PathBuf,

    /// Slot name on the primary; derived from the id when absent
    #[serde(default)]
    pub slot_name: Option<String>,

    /// Application name reported to the primary; the id when absent
    #[serde(default)]
    pub application_name: Option<String>,
}

impl ReplicaConfig {
    pub fn new(id: impl Into<NodeId>, host: impl Into<String>, port: u16, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            data_dir: data_dir.into(),
            slot_name: None,
            application_name: None,
        }
    }

    /// Effective slot name for this replica.
    pub fn slot_name(&self) -> String {
        self.slot_name
            .clone()
            .unwrap_or_else(|| derive_slot_name(self.id.as_str()))
    }

    /// Effective application name for this replica.
    pub fn application_name(&self) -> String {
        self.application_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Bootstrap tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub primary_wait_interval_ms: u64,
    pub primary_wait_attempts: u32,
    /// Failed base backups tolerated before the node is declared irrecoverable
    pub max_base_backup_attempts: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            primary_wait_interval_ms: 2_000,
            primary_wait_attempts: 30,
            max_base_backup_attempts: 2,
        }
    }
}

impl BootstrapConfig {
    pub fn primary_wait_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.primary_wait_attempts,
            Duration::from_millis(self.primary_wait_interval_ms),
        )
    }
}

/// Health monitor tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Replay lag above which a replica is classified Lagging
    pub lag_threshold_bytes: u64,
    /// Consecutive failed probes before a node is Unreachable
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            probe_timeout_ms: 2_000,
            lag_threshold_bytes: 16 * 1024 * 1024,
            failure_threshold: 3,
        }
    }
}

impl HealthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Promotion tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Polls of the candidate's recovery status after issuing promotion
    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
    /// Seconds the engine waits for promotion to finish
    pub promote_wait_secs: u32,
    /// How long a demoted primary may stay unreachable before decommission
    pub decommission_grace_secs: u64,
    /// Promote automatically when the primary is Unreachable
    pub auto_failover: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            confirm_attempts: 10,
            confirm_interval_ms: 1_000,
            promote_wait_secs: 60,
            decommission_grace_secs: 300,
            auto_failover: false,
        }
    }
}

impl PromotionConfig {
    pub fn confirm_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.confirm_attempts,
            Duration::from_millis(self.confirm_interval_ms),
        )
    }

    pub fn decommission_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.decommission_grace_secs as i64)
    }
}

/// Engine adapter tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the engine client tools; `PATH` when absent
    pub bin_dir: Option<PathBuf>,
    pub command_timeout_secs: u64,
    pub base_backup_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            command_timeout_secs: 30,
            base_backup_timeout_secs: 3_600,
        }
    }
}

impl ClusterConfig {
    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: ClusterConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster_name must not be empty".into()));
        }
        if self.credentials.user.trim().is_empty() {
            return Err(ConfigError::Invalid("credentials.user must not be empty".into()));
        }
        if self.primary.id.as_str().is_empty() || self.primary.host.is_empty() {
            return Err(ConfigError::Invalid("primary requires id and host".into()));
        }

        let mut ids = HashSet::new();
        ids.insert(self.primary.id.clone());
        let mut slots = HashSet::new();

        for replica in &self.replicas {
            validate_replica(replica)?;
            if !ids.insert(replica.id.clone()) {
                return Err(ConfigError::DuplicateNode(replica.id.to_string()));
            }
            let slot = replica.slot_name();
            if !slots.insert(slot.clone()) {
                return Err(ConfigError::DuplicateSlot(slot));
            }
        }

        if self.health.failure_threshold == 0 {
            return Err(ConfigError::Invalid("health.failure_threshold must be > 0".into()));
        }
        if self.health.poll_interval_ms == 0 || self.health.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "health intervals and timeouts must be > 0".into(),
            ));
        }
        if self.bootstrap.max_base_backup_attempts == 0 {
            return Err(ConfigError::Invalid(
                "bootstrap.max_base_backup_attempts must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Path of the persisted topology
    pub fn topology_path(&self) -> PathBuf {
        self.state_dir.join("topology.json")
    }

    /// Path of the persisted probe failure counters
    pub fn health_state_path(&self) -> PathBuf {
        self.state_dir.join("health.json")
    }

    /// Directory holding per-replica bootstrap checkpoints
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir.join("bootstrap")
    }
}

/// Validate a single replica definition (also used by `add_replica`).
pub fn validate_replica(replica: &ReplicaConfig) -> ConfigResult<()> {
    if replica.id.as_str().is_empty() || replica.host.is_empty() {
        return Err(ConfigError::Invalid("replica requires id and host".into()));
    }
    if replica.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "replica {} requires data_dir",
            replica.id
        )));
    }
    validate_slot_name(&replica.slot_name())
}

fn slot_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9_]{1,63}$").expect("static regex"))
}

/// Check a slot name against the engine's identifier rules.
pub fn validate_slot_name(name: &str) -> ConfigResult<()> {
    if slot_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSlotName(name.to_string()))
    }
}

/// Derive a slot name from a node id: lowercased, invalid characters
/// replaced by `_`, suffixed `_slot`, clipped to the identifier limit.
pub fn derive_slot_name(node_id: &str) -> String {
    const SUFFIX: &str = "_slot";
    let mut base: String = node_id
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    base.truncate(MAX_SLOT_NAME_LEN - SUFFIX.len());
    base.push_str(SUFFIX);
    base
}
