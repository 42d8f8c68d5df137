//! Replication slot bindings.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::NodeId;

/// Slot kind. Only physical slots are managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    Physical,
}

/// Observed state of a slot on the current primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// Not present on the primary
    Absent,
    /// Present, no consumer attached
    Created,
    /// Present with a streaming consumer
    Active,
    /// Present but its bound replica is gone; retains WAL until reclaimed
    Orphaned,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Absent => "Absent",
            SlotState::Created => "Created",
            SlotState::Active => "Active",
            SlotState::Orphaned => "Orphaned",
        }
    }

    /// Whether the slot exists on the primary.
    pub fn exists(&self) -> bool {
        !matches!(self, SlotState::Absent)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slot name bound to the replica expected to consume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSlot {
    pub name: String,
    pub bound_node: NodeId,
    pub kind: SlotKind,
    pub state: SlotState,
}

impl ReplicationSlot {
    pub fn new(name: impl Into<String>, bound_node: NodeId) -> Self {
        Self {
            name: name.into(),
            bound_node,
            kind: SlotKind::Physical,
            state: SlotState::Absent,
        }
    }
}
