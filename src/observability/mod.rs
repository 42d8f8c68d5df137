//! Observability for replctl
//!
//! Structured logging through `tracing`. Every record carries a typed
//! `event` field so log pipelines can key on it:
//!
//! ```ignore
//! use replctl::observability::{self, Event};
//!
//! observability::init_logging(LogFormat::Json);
//! tracing::info!(event = %Event::SlotCreated, slot = "replica_1_slot", "replication slot created");
//! ```
//!
//! Observability is read-only: nothing in this module feeds back into
//! control decisions.

mod events;

pub use events::Event;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "replctl=info";

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line records
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// reserved for structured command output.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
