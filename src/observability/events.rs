//! Observable control-plane events
//!
//! Every log record emitted by the control plane carries one of these as
//! its `event` field. Events are explicit and typed.

use std::fmt;

/// Observable events in replctl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Controller opened (topology loaded or seeded)
    ControllerOpen,
    /// Topology written to the store
    TopologyPersisted,
    /// Node lifecycle state changed
    NodeTransition,

    // Slots
    /// Physical slot created on the primary
    SlotCreated,
    /// Slot already present, nothing to do
    SlotExists,
    /// Slot dropped from the primary
    SlotDropped,
    /// Slot exists with no live bound replica
    OrphanedSlot,

    // Bootstrap
    /// Bootstrap of a replica started
    BootstrapStart,
    /// Waiting for the primary to become reachable
    BootstrapWaitPrimary,
    /// A bootstrap checkpoint was persisted
    BootstrapCheckpoint,
    /// Data directory wiped before base backup
    BootstrapCleanSlate,
    /// Replica already carries a valid standby configuration
    BootstrapAlreadyReady,
    /// Bootstrap finished; replica is ready to stream
    BootstrapComplete,
    /// Bootstrap failed
    BootstrapFailed,

    // Health
    /// A single probe against a node failed
    ProbeFailed,
    /// A poll cycle produced a snapshot
    HealthSnapshot,

    // Promotion
    /// Promotion requested by an operator or auto-failover
    PromotionRequested,
    /// Promotion refused by validation
    PromotionDenied,
    /// Promotion action issued to the candidate
    PromotionIssued,
    /// Replica upstream reconciliation failed
    ReconcileFailed,
    /// Promotion finished
    PromotionSucceeded,
    /// Promotion failed after approval
    PromotionFailed,
}

impl Event {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ControllerOpen => "CONTROLLER_OPEN",
            Event::TopologyPersisted => "TOPOLOGY_PERSISTED",
            Event::NodeTransition => "NODE_TRANSITION",
            Event::SlotCreated => "SLOT_CREATED",
            Event::SlotExists => "SLOT_EXISTS",
            Event::SlotDropped => "SLOT_DROPPED",
            Event::OrphanedSlot => "ORPHANED_SLOT",
            Event::BootstrapStart => "BOOTSTRAP_START",
            Event::BootstrapWaitPrimary => "BOOTSTRAP_WAIT_PRIMARY",
            Event::BootstrapCheckpoint => "BOOTSTRAP_CHECKPOINT",
            Event::BootstrapCleanSlate => "BOOTSTRAP_CLEAN_SLATE",
            Event::BootstrapAlreadyReady => "BOOTSTRAP_ALREADY_READY",
            Event::BootstrapComplete => "BOOTSTRAP_COMPLETE",
            Event::BootstrapFailed => "BOOTSTRAP_FAILED",
            Event::ProbeFailed => "PROBE_FAILED",
            Event::HealthSnapshot => "HEALTH_SNAPSHOT",
            Event::PromotionRequested => "PROMOTION_REQUESTED",
            Event::PromotionDenied => "PROMOTION_DENIED",
            Event::PromotionIssued => "PROMOTION_ISSUED",
            Event::ReconcileFailed => "RECONCILE_FAILED",
            Event::PromotionSucceeded => "PROMOTION_SUCCEEDED",
            Event::PromotionFailed => "PROMOTION_FAILED",
        }
    }

    /// Check if this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Event::BootstrapFailed
                | Event::ProbeFailed
                | Event::PromotionDenied
                | Event::ReconcileFailed
                | Event::PromotionFailed
                | Event::OrphanedSlot
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        for event in [
            Event::SlotCreated,
            Event::BootstrapCheckpoint,
            Event::NodeTransition,
            Event::PromotionDenied,
        ] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
            assert_eq!(format!("{}", event), name);
        }
    }

    #[test]
    fn test_failure_events() {
        assert!(Event::BootstrapFailed.is_failure());
        assert!(Event::OrphanedSlot.is_failure());
        assert!(!Event::SlotCreated.is_failure());
        assert!(!Event::PromotionSucceeded.is_failure());
    }
}
