//! Cluster nodes and their lifecycle state machine.
//!
//! Lifecycle:
//! - `Provisioning → Bootstrapping → Streaming ⇄ Lagging`
//! - `Streaming | Lagging → Unreachable` on debounced probe failure,
//!   `Unreachable → Streaming | Lagging` on recovery
//! - `Streaming | Lagging → Promoted` only through promotion
//! - any state `→ Decommissioned`, which is terminal
//!
//! A primary has no bootstrap phase: it leaves `Provisioning` on its first
//! healthy poll. A freshly promoted primary sits in `Promoted` until the
//! next healthy poll settles it into `Streaming`.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{TopologyError, TopologyResult};
use crate::config::{Credentials, PrimaryConfig, ReplicaConfig};
use crate::engine::Endpoint;
use crate::observability::Event;

/// Stable node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Replication role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Replica,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Replica => "replica",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Provisioning,
    Bootstrapping,
    Streaming,
    Lagging,
    Unreachable,
    Promoted,
    Decommissioned,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Provisioning => "Provisioning",
            NodeState::Bootstrapping => "Bootstrapping",
            NodeState::Streaming => "Streaming",
            NodeState::Lagging => "Lagging",
            NodeState::Unreachable => "Unreachable",
            NodeState::Promoted => "Promoted",
            NodeState::Decommissioned => "Decommissioned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Decommissioned)
    }

    /// Streaming or Lagging: the replica consumes WAL from the primary.
    pub fn is_replicating(&self) -> bool {
        matches!(self, NodeState::Streaming | NodeState::Lagging)
    }

    /// Whether `self → next` is an allowed transition.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;

        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Decommissioned) => true,
            (Provisioning, Bootstrapping | Streaming | Unreachable) => true,
            (Bootstrapping, Streaming | Lagging | Unreachable) => true,
            (Streaming | Lagging, Streaming | Lagging | Unreachable | Promoted | Bootstrapping) => {
                true
            }
            (Unreachable, Streaming | Lagging | Bootstrapping) => true,
            (Promoted, Streaming | Unreachable) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the cluster as tracked by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: Role,
    pub host: String,
    pub port: u16,

    /// Replica data directory; unknown for the configured primary
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Slot this node consumes on the primary (replicas only)
    #[serde(default)]
    pub slot_name: Option<String>,

    pub application_name: String,
    pub state: NodeState,

    /// Node this replica streams from
    #[serde(default)]
    pub upstream: Option<NodeId>,

    #[serde(default)]
    pub bootstrap_complete: bool,

    /// Last per-node failure, surfaced instead of failing the controller
    #[serde(default)]
    pub last_error: Option<String>,

    /// When a former primary was demoted by promotion
    #[serde(default)]
    pub demoted_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn primary(config: &PrimaryConfig) -> Self {
        Self {
            id: config.id.clone(),
            role: Role::Primary,
            host: config.host.clone(),
            port: config.port,
            data_dir: None,
            slot_name: None,
            application_name: config.id.to_string(),
            state: NodeState::Provisioning,
            upstream: None,
            bootstrap_complete: false,
            last_error: None,
            demoted_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn replica(config: &ReplicaConfig, upstream: &NodeId) -> Self {
        Self {
            id: config.id.clone(),
            role: Role::Replica,
            host: config.host.clone(),
            port: config.port,
            data_dir: Some(config.data_dir.clone()),
            slot_name: Some(config.slot_name()),
            application_name: config.application_name(),
            state: NodeState::Provisioning,
            upstream: Some(upstream.clone()),
            bootstrap_complete: false,
            last_error: None,
            demoted_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn endpoint(&self, credentials: &Credentials) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port, credentials)
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: NodeState) -> TopologyResult<NodeState> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(TopologyError::ForbiddenTransition {
                node: self.id.to_string(),
                from: from.as_str(),
                to: next.as_str(),
            });
        }
        if from != next {
            tracing::info!(
                event = %Event::NodeTransition,
                node = %self.id,
                role = %self.role,
                from = %from,
                to = %next,
                "node state changed"
            );
            self.state = next;
            self.updated_at = Utc::now();
        }
        Ok(from)
    }

    /// Record a failure against this node without changing its state.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica() -> Node {
        Node::replica(
            &ReplicaConfig::new("replica_1", "db1", 5432, "/data/r1"),
            &NodeId::from("primary"),
        )
    }

    #[test]
    fn test_replica_defaults_from_config() {
        let node = replica();
        assert_eq!(node.role, Role::Replica);
        assert_eq!(node.state, NodeState::Provisioning);
        assert_eq!(node.slot_name.as_deref(), Some("replica_1_slot"));
        assert_eq!(node.upstream, Some(NodeId::from("primary")));
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut node = replica();
        node.transition(NodeState::Bootstrapping).unwrap();
        node.transition(NodeState::Streaming).unwrap();
        node.transition(NodeState::Lagging).unwrap();
        node.transition(NodeState::Streaming).unwrap();
        node.transition(NodeState::Unreachable).unwrap();
        node.transition(NodeState::Streaming).unwrap();
        node.transition(NodeState::Promoted).unwrap();
        assert_eq!(node.state, NodeState::Promoted);
    }

    #[test]
    fn test_promotion_requires_replicating_state() {
        let mut node = replica();
        assert!(node.transition(NodeState::Promoted).is_err());
        node.transition(NodeState::Bootstrapping).unwrap();
        assert!(node.transition(NodeState::Promoted).is_err());
        node.transition(NodeState::Unreachable).unwrap();
        assert!(node.transition(NodeState::Promoted).is_err());
    }

    #[test]
    fn test_decommissioned_is_terminal() {
        let mut node = replica();
        node.transition(NodeState::Decommissioned).unwrap();
        let err = node.transition(NodeState::Streaming).unwrap_err();
        assert!(matches!(err, TopologyError::ForbiddenTransition { .. }));
        assert!(node.transition(NodeState::Decommissioned).is_err());
    }

    #[test]
    fn test_same_state_is_noop() {
        let mut node = replica();
        let before = node.updated_at;
        assert_eq!(node.transition(NodeState::Provisioning).unwrap(), NodeState::Provisioning);
        assert_eq!(node.updated_at, before);
    }

    #[test]
    fn test_node_id_serializes_transparently() {
        let json = serde_json::to_string(&NodeId::from("r1")).unwrap();
        assert_eq!(json, "\"r1\"");
    }
}
