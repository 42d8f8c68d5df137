//! replctl - control plane for a single-primary streaming-replication cluster
//!
//! Components:
//! - `slots`: replication slot lifecycle on the primary
//! - `bootstrap`: resumable base backup and standby configuration
//! - `health`: debounced node health classification
//! - `promotion`: validated, explained replica promotion
//! - `controller`: owns the topology and composes the above

pub mod bootstrap;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod health;
pub mod observability;
pub mod promotion;
pub mod retry;
pub mod slots;
pub mod topology;
