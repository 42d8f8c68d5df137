//! Replica promotion
//!
//! Promotion converts a streaming replica into the cluster's primary.
//! It is always explicitly requested, validated before any effect on the
//! cluster, and explained afterwards whatever the outcome.
//!
//! Safety rule: a replica is never promoted while the current primary still
//! answers probes, unless the request carries `force`.

mod coordinator;
mod errors;
mod explanation;
mod request;
mod state;
mod validator;

pub use coordinator::{PromotionCoordinator, PromotionReport};
pub use errors::{PromotionError, PromotionResult};
pub use explanation::{PromotionExplanation, PromotionOutcome, ReconcileResult};
pub use request::PromotionRequest;
pub use state::{DenialReason, PromotionState};
pub use validator::{PromotionValidator, ValidationCheck, ValidationContext, ValidationResult};
