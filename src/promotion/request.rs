//! Promotion Request Types
//!
//! Promotion is always explicitly requested, by an operator or by the
//! auto-failover loop. A node never assumes primary authority on its own.

use serde::Serialize;
use uuid::Uuid;

use crate::topology::NodeId;

/// A request to promote a replica to primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionRequest {
    /// Correlates every log record and the explanation of this attempt
    pub attempt_id: Uuid,

    /// The replica to promote
    pub candidate: NodeId,

    /// Proceed even if the current primary still answers probes.
    ///
    /// DANGER: risks two writable primaries if the old primary is in fact
    /// serving clients. Use only when the primary is known to be fenced.
    pub force: bool,

    /// Free-form reason, for observability only
    pub reason: Option<String>,
}

impl PromotionRequest {
    pub fn new(candidate: NodeId) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            candidate,
            force: false,
            reason: None,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let request = PromotionRequest::new(NodeId::from("replica_1"))
            .with_force(true)
            .with_reason("primary host lost");
        assert!(request.force);
        assert_eq!(request.reason.as_deref(), Some("primary host lost"));
        assert!(!request.attempt_id.is_nil());
    }

    #[test]
    fn test_attempt_ids_are_unique() {
        let a = PromotionRequest::new(NodeId::from("r"));
        let b = PromotionRequest::new(NodeId::from("r"));
        assert_ne!(a.attempt_id, b.attempt_id);
    }
}
