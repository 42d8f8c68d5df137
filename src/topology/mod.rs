//! Cluster topology
//!
//! The topology is the controller's single source of truth: which node is
//! primary, which replicas exist, and which slot each replica consumes.
//! It is persisted after every mutation and carries a `generation` that is
//! bumped on each one, so results computed against an older topology can
//! be recognised and discarded.

mod errors;
mod node;
mod slot;
mod store;

pub use errors::{StoreError, StoreResult, TopologyError, TopologyResult};
pub use node::{Node, NodeId, NodeState, Role};
pub use slot::{ReplicationSlot, SlotKind, SlotState};
pub use store::{FileTopologyStore, MemoryTopologyStore, TopologyStore};
pub(crate) use store::write_atomic;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, ReplicaConfig};

/// Primary, replica set and slot bindings of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub cluster_name: String,

    /// Bumped on every mutation
    pub generation: u64,

    pub primary: NodeId,

    /// Live replicas in insertion order
    pub replicas: Vec<NodeId>,

    /// Every node ever added, including decommissioned ones
    pub nodes: BTreeMap<NodeId, Node>,

    /// Slots on the current primary, keyed by name
    pub slots: BTreeMap<String, ReplicationSlot>,
}

impl ClusterTopology {
    /// Seed a topology from the desired state in `config`.
    pub fn from_config(config: &ClusterConfig) -> TopologyResult<Self> {
        let primary = Node::primary(&config.primary);
        let mut topology = Self {
            cluster_name: config.cluster_name.clone(),
            generation: 0,
            primary: primary.id.clone(),
            replicas: Vec::new(),
            nodes: BTreeMap::new(),
            slots: BTreeMap::new(),
        };
        topology.nodes.insert(primary.id.clone(), primary);
        for replica in &config.replicas {
            topology.add_replica(replica)?;
        }
        Ok(topology)
    }

    pub fn node(&self, id: &NodeId) -> TopologyResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| TopologyError::UnknownNode(id.to_string()))
    }

    pub fn node_mut(&mut self, id: &NodeId) -> TopologyResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TopologyError::UnknownNode(id.to_string()))
    }

    pub fn primary_node(&self) -> TopologyResult<&Node> {
        self.node(&self.primary)
    }

    /// Live replicas in order.
    pub fn replica_nodes(&self) -> impl Iterator<Item = &Node> {
        self.replicas.iter().filter_map(move |id| self.nodes.get(id))
    }

    /// Live replica `id`, or an error if it is unknown or not a replica.
    pub fn replica(&self, id: &NodeId) -> TopologyResult<&Node> {
        let node = self.node(id)?;
        if node.role != Role::Replica || !node.is_active() {
            return Err(TopologyError::NotAReplica(id.to_string()));
        }
        Ok(node)
    }

    /// Slot bound to `node`, if any.
    pub fn slot_for(&self, node: &NodeId) -> Option<&ReplicationSlot> {
        self.slots.values().find(|slot| &slot.bound_node == node)
    }

    pub fn slot_for_mut(&mut self, node: &NodeId) -> Option<&mut ReplicationSlot> {
        self.slots.values_mut().find(|slot| &slot.bound_node == node)
    }

    /// Add a replica in `Provisioning` with its slot binding `Absent`.
    ///
    /// A decommissioned node with the same id is replaced.
    pub fn add_replica(&mut self, config: &ReplicaConfig) -> TopologyResult<&Node> {
        if let Some(existing) = self.nodes.get(&config.id) {
            if existing.is_active() {
                return Err(TopologyError::DuplicateNode(config.id.to_string()));
            }
        }
        let slot_name = config.slot_name();
        if self.slots.contains_key(&slot_name)
            || self
                .replica_nodes()
                .any(|n| n.slot_name.as_deref() == Some(slot_name.as_str()))
        {
            return Err(TopologyError::DuplicateSlot(slot_name));
        }

        let node = Node::replica(config, &self.primary);
        self.slots.insert(
            slot_name.clone(),
            ReplicationSlot::new(slot_name, node.id.clone()),
        );
        self.replicas.push(node.id.clone());
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.node(&id)
    }

    /// Decommission replica `id` and drop it from the live replica set.
    ///
    /// The slot binding is left in place; the caller decides whether it
    /// was dropped or is now orphaned.
    pub fn decommission_replica(&mut self, id: &NodeId) -> TopologyResult<()> {
        self.replica(id)?;
        self.node_mut(id)?.transition(NodeState::Decommissioned)?;
        self.replicas.retain(|r| r != id);
        Ok(())
    }

    /// Bump the generation. Called once per persisted mutation.
    pub fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Check the structural invariants:
    /// - exactly one live node with role Primary, and it is `primary`
    /// - every Streaming/Lagging replica has exactly one Active slot bound to it
    /// - no two live replicas share a slot name
    pub fn check_invariants(&self) -> TopologyResult<()> {
        let primaries: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.is_active() && n.role == Role::Primary)
            .collect();
        if primaries.len() != 1 {
            return Err(TopologyError::InvariantViolation(format!(
                "expected exactly one primary, found {}",
                primaries.len()
            )));
        }
        if primaries[0].id != self.primary {
            return Err(TopologyError::InvariantViolation(format!(
                "primary pointer {} disagrees with node roles ({})",
                self.primary, primaries[0].id
            )));
        }

        let mut seen = HashSet::new();
        for replica in self.replica_nodes() {
            if let Some(name) = &replica.slot_name {
                if !seen.insert(name.as_str()) {
                    return Err(TopologyError::InvariantViolation(format!(
                        "slot {} shared by more than one replica",
                        name
                    )));
                }
            }
            if replica.state.is_replicating() {
                let active = self
                    .slots
                    .values()
                    .filter(|s| s.bound_node == replica.id && s.state == SlotState::Active)
                    .count();
                if active != 1 {
                    return Err(TopologyError::InvariantViolation(format!(
                        "{} replica {} has {} active slots",
                        replica.state, replica.id, active
                    )));
                }
            }
        }
        Ok(())
    }
}
