//! Point-in-time cluster health.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::Lsn;
use crate::slots::SlotRecord;
use crate::topology::{NodeId, NodeState, Role};

/// Debounced classification of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthClass {
    /// Reachable, lag at or below threshold
    Healthy,
    /// Reachable, lag above threshold
    Lagging,
    /// Failed the configured number of consecutive probes
    Unreachable,
    /// Recovery mode disagrees with the recorded role
    Diverged,
}

impl HealthClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthClass::Healthy => "Healthy",
            HealthClass::Lagging => "Lagging",
            HealthClass::Unreachable => "Unreachable",
            HealthClass::Diverged => "Diverged",
        }
    }

    /// Whether a replica in this class may be promoted.
    pub fn is_promotable(&self) -> bool {
        matches!(self, HealthClass::Healthy | HealthClass::Lagging)
    }

    /// Class implied by a recorded node state, used before any sample exists.
    pub fn from_state(state: NodeState) -> Self {
        match state {
            NodeState::Lagging => HealthClass::Lagging,
            NodeState::Unreachable | NodeState::Decommissioned => HealthClass::Unreachable,
            _ => HealthClass::Healthy,
        }
    }
}

impl fmt::Display for HealthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one node at `last_checked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeHealth {
    pub node_id: NodeId,
    pub role: Role,
    /// Outcome of this cycle's probe
    pub reachable: bool,
    /// Whether the server reported itself in recovery (false when unknown)
    pub recovery_mode: bool,
    /// Replay lag behind the primary's write position (replicas only)
    pub lag_bytes: Option<u64>,
    pub last_checked: DateTime<Utc>,
    pub class: HealthClass,
    pub consecutive_failures: u32,
    pub error: Option<String>,
}

/// Immutable result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Topology generation the cycle was computed against
    pub generation: u64,
    pub primary: NodeId,
    pub primary_lsn: Option<Lsn>,
    pub nodes: BTreeMap<NodeId, NodeHealth>,
    /// Slots listed on the primary (empty when it could not be listed)
    pub slots: Vec<SlotRecord>,
    /// Whether `slots` is the primary's actual listing
    pub slots_listed: bool,
    /// Physical slots with no live bound replica; the recorded orphans when
    /// the listing failed
    pub orphaned_slots: Vec<String>,
}

impl HealthSnapshot {
    pub fn node(&self, id: &NodeId) -> Option<&NodeHealth> {
        self.nodes.get(id)
    }

    pub fn class_of(&self, id: &NodeId) -> Option<HealthClass> {
        self.nodes.get(id).map(|n| n.class)
    }

    pub fn primary_health(&self) -> Option<&NodeHealth> {
        self.nodes.get(&self.primary)
    }
}
