//! Dead-letter record shape (§3, §4.1, §7). One row/stream-entry per exhausted delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEvent {
    pub source_event: String,
    pub payload_snippet: serde_json::Value,
    pub error_code: String,
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl DlqEvent {
    /// Terminal once `attempts` has exceeded the configured `max_deliveries` (§4.1).
    pub fn is_terminal(&self, max_deliveries: u32) -> bool {
        self.attempts > max_deliveries
    }
}
