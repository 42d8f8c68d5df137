//! Turning a health snapshot into node and slot state changes.
//!
//! Transitions are driven by the debounced classification only; a single
//! failed probe never moves a node.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::health::{HealthClass, HealthSnapshot};
use crate::slots::observed_state;
use crate::topology::{ClusterTopology, NodeId, NodeState, Role, SlotState};

/// What applying one snapshot changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Applied {
    pub changed: bool,
    /// Demoted primaries decommissioned after their grace period
    pub decommissioned: Vec<NodeId>,
}

/// Apply `snapshot` to `topology`.
pub fn apply_snapshot(
    topology: &mut ClusterTopology,
    snapshot: &HealthSnapshot,
    grace: chrono::Duration,
    now: DateTime<Utc>,
) -> Applied {
    let mut applied = Applied::default();

    for (id, health) in &snapshot.nodes {
        let node = match topology.nodes.get_mut(id) {
            Some(node) if node.is_active() => node,
            _ => continue,
        };

        let target = match (node.demoted_at, node.role, health.class) {
            (Some(demoted_at), _, HealthClass::Unreachable) if now - demoted_at >= grace => {
                applied.decommissioned.push(id.clone());
                NodeState::Decommissioned
            }
            // A demoted primary only leaves Unreachable through decommission.
            (Some(_), _, _) => NodeState::Unreachable,
            (None, _, HealthClass::Unreachable | HealthClass::Diverged) => NodeState::Unreachable,
            (None, Role::Primary, HealthClass::Healthy | HealthClass::Lagging) => {
                NodeState::Streaming
            }
            (None, Role::Replica, HealthClass::Healthy) => NodeState::Streaming,
            (None, Role::Replica, HealthClass::Lagging) => NodeState::Lagging,
        };

        if node.state != target {
            if node.state.can_transition_to(target) {
                // transition only fails on a forbidden move, checked above
                if node.transition(target).is_ok() {
                    applied.changed = true;
                }
            } else {
                tracing::debug!(
                    node = %id,
                    from = %node.state,
                    to = %target,
                    class = %health.class,
                    "health result does not map to an allowed transition"
                );
            }
        }

        match (health.class, &health.error) {
            (HealthClass::Diverged, Some(error)) if node.last_error.as_ref() != Some(error) => {
                node.record_error(error.clone());
                applied.changed = true;
            }
            (HealthClass::Healthy | HealthClass::Lagging, _)
                if node.last_error.is_some() && node.demoted_at.is_none() =>
            {
                node.last_error = None;
                applied.changed = true;
            }
            _ => {}
        }
    }

    if snapshot.slots_listed && snapshot.primary_health().map(|h| h.reachable) == Some(true) {
        applied.changed |= apply_slot_states(topology, snapshot);
    }

    applied
}

/// Refresh slot states from the primary's listing.
///
/// A slot whose bound replica is gone becomes `Orphaned` while it still
/// exists, and is forgotten once it does not.
fn apply_slot_states(topology: &mut ClusterTopology, snapshot: &HealthSnapshot) -> bool {
    let live: HashSet<NodeId> = topology.replicas.iter().cloned().collect();
    let mut changed = false;
    let mut gone = Vec::new();

    for (name, slot) in topology.slots.iter_mut() {
        let observed = observed_state(&snapshot.slots, name);
        let next = match (live.contains(&slot.bound_node), observed.exists()) {
            (true, _) => observed,
            (false, true) => SlotState::Orphaned,
            (false, false) => {
                gone.push(name.clone());
                continue;
            }
        };
        if slot.state != next {
            slot.state = next;
            changed = true;
        }
    }

    for name in gone {
        topology.slots.remove(&name);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::health::NodeHealth;
    use crate::slots::SlotRecord;
    use std::collections::BTreeMap;

    fn topology() -> ClusterTopology {
        let config = ClusterConfig::from_json(
            r#"{
                "cluster_name": "main",
                "state_dir": "/unused",
                "credentials": {"user": "replicator"},
                "primary": {"id": "primary", "host": "db0"},
                "replicas": [{"id": "replica_1", "host": "db1", "data_dir": "/data/r1"}]
            }"#,
        )
        .unwrap();
        let mut topology = ClusterTopology::from_config(&config).unwrap();
        topology
            .node_mut(&NodeId::from("replica_1"))
            .unwrap()
            .bootstrap_complete = true;
        topology
    }

    fn health(id: &str, role: Role, class: HealthClass) -> NodeHealth {
        NodeHealth {
            node_id: NodeId::from(id),
            role,
            reachable: !matches!(class, HealthClass::Unreachable),
            recovery_mode: role == Role::Replica,
            lag_bytes: None,
            last_checked: Utc::now(),
            class,
            consecutive_failures: 0,
            error: None,
        }
    }

    fn snapshot(nodes: Vec<NodeHealth>, slots: Vec<SlotRecord>) -> HealthSnapshot {
        HealthSnapshot {
            taken_at: Utc::now(),
            generation: 0,
            primary: NodeId::from("primary"),
            primary_lsn: None,
            nodes: nodes
                .into_iter()
                .map(|n| (n.node_id.clone(), n))
                .collect::<BTreeMap<_, _>>(),
            slots,
            slots_listed: true,
            orphaned_slots: Vec::new(),
        }
    }

    fn active_slot(name: &str) -> SlotRecord {
        SlotRecord {
            name: name.into(),
            kind: "physical".into(),
            active: true,
            restart_lsn: None,
        }
    }

    #[test]
    fn test_healthy_nodes_stream() {
        let mut topology = topology();
        let snapshot = snapshot(
            vec![
                health("primary", Role::Primary, HealthClass::Healthy),
                health("replica_1", Role::Replica, HealthClass::Healthy),
            ],
            vec![active_slot("replica_1_slot")],
        );

        let applied = apply_snapshot(&mut topology, &snapshot, chrono::Duration::zero(), Utc::now());
        assert!(applied.changed);
        assert_eq!(topology.primary_node().unwrap().state, NodeState::Streaming);
        assert_eq!(
            topology.node(&NodeId::from("replica_1")).unwrap().state,
            NodeState::Streaming
        );
        assert_eq!(topology.slots["replica_1_slot"].state, SlotState::Active);
        assert!(topology.check_invariants().is_ok());
    }

    #[test]
    fn test_diverged_replica_is_unreachable_with_error() {
        let mut topology = topology();
        let mut diverged = health("replica_1", Role::Replica, HealthClass::Diverged);
        diverged.error = Some("replica left recovery".into());
        let snapshot = snapshot(vec![diverged], Vec::new());

        apply_snapshot(&mut topology, &snapshot, chrono::Duration::zero(), Utc::now());
        let node = topology.node(&NodeId::from("replica_1")).unwrap();
        assert_eq!(node.state, NodeState::Unreachable);
        assert_eq!(node.last_error.as_deref(), Some("replica left recovery"));
    }

    #[test]
    fn test_demoted_primary_decommissioned_after_grace() {
        let mut topology = topology();
        let old = topology.node_mut(&NodeId::from("primary")).unwrap();
        old.transition(NodeState::Unreachable).unwrap();
        old.demoted_at = Some(Utc::now() - chrono::Duration::seconds(120));
        let snapshot = snapshot(
            vec![health("primary", Role::Primary, HealthClass::Unreachable)],
            Vec::new(),
        );

        let applied = apply_snapshot(
            &mut topology,
            &snapshot,
            chrono::Duration::seconds(300),
            Utc::now(),
        );
        assert!(applied.decommissioned.is_empty());

        let applied = apply_snapshot(
            &mut topology,
            &snapshot,
            chrono::Duration::seconds(60),
            Utc::now(),
        );
        assert_eq!(applied.decommissioned, vec![NodeId::from("primary")]);
        assert_eq!(
            topology.node(&NodeId::from("primary")).unwrap().state,
            NodeState::Decommissioned
        );
    }

    #[test]
    fn test_slot_of_removed_replica_becomes_orphaned() {
        let mut topology = topology();
        topology.decommission_replica(&NodeId::from("replica_1")).unwrap();
        let mut idle = active_slot("replica_1_slot");
        idle.active = false;
        let snapshot = snapshot(
            vec![health("primary", Role::Primary, HealthClass::Healthy)],
            vec![idle],
        );

        apply_snapshot(&mut topology, &snapshot, chrono::Duration::zero(), Utc::now());
        assert_eq!(topology.slots["replica_1_slot"].state, SlotState::Orphaned);

        let snapshot = snapshot_without_slots();
        apply_snapshot(&mut topology, &snapshot, chrono::Duration::zero(), Utc::now());
        assert!(topology.slots.is_empty());
    }

    fn snapshot_without_slots() -> HealthSnapshot {
        snapshot(
            vec![health("primary", Role::Primary, HealthClass::Healthy)],
            Vec::new(),
        )
    }

    #[test]
    fn test_failed_slot_listing_leaves_slots_alone() {
        let mut topology = topology();
        topology.slots.get_mut("replica_1_slot").unwrap().state = SlotState::Active;
        let mut failed = snapshot_without_slots();
        failed.slots_listed = false;

        apply_snapshot(&mut topology, &failed, chrono::Duration::zero(), Utc::now());
        assert_eq!(topology.slots["replica_1_slot"].state, SlotState::Active);

        topology.decommission_replica(&NodeId::from("replica_1")).unwrap();
        topology.slots.get_mut("replica_1_slot").unwrap().state = SlotState::Orphaned;
        apply_snapshot(&mut topology, &failed, chrono::Duration::zero(), Utc::now());
        assert_eq!(topology.slots["replica_1_slot"].state, SlotState::Orphaned);
    }

    #[test]
    fn test_unreachable_primary_snapshot_leaves_slots_alone() {
        let mut topology = topology();
        topology.slots.get_mut("replica_1_slot").unwrap().state = SlotState::Active;
        let snapshot = snapshot(
            vec![health("primary", Role::Primary, HealthClass::Unreachable)],
            Vec::new(),
        );

        apply_snapshot(&mut topology, &snapshot, chrono::Duration::zero(), Utc::now());
        assert_eq!(topology.slots["replica_1_slot"].state, SlotState::Active);
    }
}
