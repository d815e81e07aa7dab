//! Domain event logging for Courtside services.
//!
//! Provides structured logging for business domain events with a consistent
//! schema: which pipeline stage ran, what it decided, how long it took, and
//! how it failed if it failed. Events are emitted as tracing log lines (JSON
//! in production); exporting them anywhere else is a backend concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a domain operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    Failure,
    Degraded,
    Skipped,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Degraded => write!(f, "degraded"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Categories of domain events for filtering and routing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Classification,
    SqlPath,
    VectorPath,
    Generation,
    Persistence,
    Api,
    System,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::SqlPath => write!(f, "sql_path"),
            Self::VectorPath => write!(f, "vector_path"),
            Self::Generation => write!(f, "generation"),
            Self::Persistence => write!(f, "persistence"),
            Self::Api => write!(f, "api"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A structured domain event for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    /// Category of the event
    pub category: EventCategory,
    /// Specific event type (e.g., "routing_decided", "sql_rejected")
    pub event_type: String,
    /// Entity type being operated on (e.g., "conversation", "statement")
    pub entity_type: Option<String>,
    /// Entity ID
    pub entity_id: Option<String>,
    /// Result of the operation
    pub result: OperationResult,
    /// Duration in milliseconds (if applicable)
    pub duration_ms: Option<u64>,
    /// Attempt number for retries
    pub attempt: Option<u32>,
    /// Error kind if failed (taxonomy slug, not free text)
    pub error: Option<String>,
    /// Service that emitted the event
    pub service: String,
    /// Additional structured metadata
    pub metadata: Option<serde_json::Value>,
}

impl DomainEvent {
    /// Create a new domain event builder
    pub fn new(
        service: impl Into<String>,
        category: EventCategory,
        event_type: impl Into<String>,
    ) -> DomainEventBuilder {
        DomainEventBuilder {
            service: service.into(),
            category,
            event_type: event_type.into(),
            entity_type: None,
            entity_id: None,
            result: OperationResult::Success,
            duration_ms: None,
            attempt: None,
            error: None,
            metadata: None,
        }
    }
}

/// Builder for constructing domain events
pub struct DomainEventBuilder {
    service: String,
    category: EventCategory,
    event_type: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
    result: OperationResult,
    duration_ms: Option<u64>,
    attempt: Option<u32>,
    error: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl DomainEventBuilder {
    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn result(mut self, result: OperationResult) -> Self {
        self.result = result;
        self
    }

    pub fn success(mut self) -> Self {
        self.result = OperationResult::Success;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.result = OperationResult::Failure;
        self.error = Some(error.into());
        self
    }

    pub fn degraded(mut self, error: impl Into<String>) -> Self {
        self.result = OperationResult::Degraded;
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> DomainEvent {
        DomainEvent {
            timestamp: Utc::now(),
            category: self.category,
            event_type: self.event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            result: self.result,
            duration_ms: self.duration_ms,
            attempt: self.attempt,
            error: self.error,
            service: self.service,
            metadata: self.metadata,
        }
    }

    /// Build and emit the event as a log line
    pub fn emit(self) {
        let event = self.build();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        match event.result {
            OperationResult::Failure => {
                tracing::warn!(
                    category = %event.category,
                    event_type = %event.event_type,
                    error = event.error.as_deref().unwrap_or("unknown"),
                    "domain_event {}", json
                );
            }
            _ => {
                tracing::info!(
                    category = %event.category,
                    event_type = %event.event_type,
                    "domain_event {}", json
                );
            }
        }
    }
}

/// Measures one pipeline stage and emits its event on completion.
///
/// ```ignore
/// let timer = StageTimer::start("answer-engine", EventCategory::VectorPath, "index_searched");
/// // ... work ...
/// timer.success_with(serde_json::json!({"hits": hits.len()}));
/// ```
pub struct StageTimer {
    service: String,
    category: EventCategory,
    event_type: String,
    started: std::time::Instant,
}

impl StageTimer {
    pub fn start(
        service: impl Into<String>,
        category: EventCategory,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            category,
            event_type: event_type.into(),
            started: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn success(self) {
        let ms = self.elapsed_ms();
        DomainEvent::new(self.service, self.category, self.event_type)
            .duration_ms(ms)
            .emit();
    }

    pub fn success_with(self, metadata: serde_json::Value) {
        let ms = self.elapsed_ms();
        DomainEvent::new(self.service, self.category, self.event_type)
            .duration_ms(ms)
            .metadata(metadata)
            .emit();
    }

    pub fn failure(self, error: impl Into<String>) {
        let ms = self.elapsed_ms();
        DomainEvent::new(self.service, self.category, self.event_type)
            .failure(error)
            .duration_ms(ms)
            .emit();
    }
}
