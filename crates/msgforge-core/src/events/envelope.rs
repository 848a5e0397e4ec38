//! The event envelope: mandatory header fields (§4.1, §6) wrapped around a typed payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mandatory header fields for every published event (§4.1's `Publish` contract, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeaders {
    pub schema_version: u32,
    /// De-duplication key consumers must treat as authoritative (ordering is only
    /// guaranteed per-stream, never cross-stream).
    pub idempotency_key: String,
    pub trace_id: String,
    /// Required whenever the event is tenant-scoped; never null, never absent, and the
    /// literal `"default"` is a reserved sentinel (§6).
    pub tenant_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl EventHeaders {
    pub fn new(idempotency_key: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            schema_version: 1,
            idempotency_key: idempotency_key.into(),
            trace_id: Uuid::new_v4().to_string(),
            tenant_id,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

/// A typed event envelope: headers plus a strongly-typed payload. `msgforge-events`
/// serializes this to JSON for the wire; everything upstream of the bus works with the
/// typed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    #[serde(flatten)]
    pub headers: EventHeaders,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(headers: EventHeaders, payload: T) -> Self {
        Self { headers, payload }
    }
}
