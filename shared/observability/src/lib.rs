//! Observability infrastructure for Courtside.
//!
//! Two pieces: tracing subscriber initialization ([`init_tracing`]) and
//! structured domain-event logging ([`DomainEvent`]) for routing decisions,
//! stage timings, and the error taxonomy.

pub mod events;
pub mod init;

pub use events::{DomainEvent, EventCategory, OperationResult, StageTimer};
pub use init::{init_tracing, LogFormat, TracingConfig};

// Re-export the macros services actually use so callers only need this crate.
pub use tracing::{debug, error, info, warn};
