//! The durable `MediaGroup`/`MediaGroupItem` entities and the ephemeral `AlbumState`
//! the assembler keeps in the fast store while a `grouped_id` is still collecting
//! vision results (§3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumKind {
    Photo,
    Video,
    Mixed,
    Document,
}

/// Durable album row; unique on `(tenant_id, channel_id, grouped_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaGroup {
    pub id: Uuid,
    pub tenant_id: String,
    pub channel_id: Uuid,
    pub grouped_id: i64,
    pub items_count: i32,
    pub album_kind: AlbumKind,
    /// Includes the `enrichment` subtree once the album is assembled.
    pub meta: serde_json::Value,
}

/// Unique on `(group_id, position)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaGroupItem {
    pub group_id: Uuid,
    pub position: i32,
    pub post_id: Uuid,
    pub sha256: String,
}

/// Per-vision-result summary accumulated into `AlbumState::received` as posts complete
/// vision analysis, keyed by `post_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionSummary {
    pub post_id: Uuid,
    pub position: i32,
    pub labels: Vec<String>,
    pub description: String,
    pub ocr_text: String,
    pub is_meme: bool,
}

/// Ephemeral, fast-store-resident state machine record for one album in flight. Keyed by
/// `album:state:{group_id}` with TTL `assembly_ttl` (default 24h, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumState {
    pub group_id: Uuid,
    pub tenant_id: String,
    pub channel_id: Uuid,
    pub expected_items: i32,
    pub received: HashMap<Uuid, VisionSummary>,
    pub created_at: DateTime<Utc>,
    /// Set atomically on the transition to `assembled`; guarantees exactly-once emission
    /// of `album.assembled` even under concurrent completion of the last two items.
    pub assembled_at: Option<DateTime<Utc>>,
}

impl AlbumState {
    pub fn new(group_id: Uuid, tenant_id: impl Into<String>, channel_id: Uuid, expected_items: i32, created_at: DateTime<Utc>) -> Self {
        Self {
            group_id,
            tenant_id: tenant_id.into(),
            channel_id,
            expected_items,
            received: HashMap::new(),
            created_at,
            assembled_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as i32 >= self.expected_items && self.expected_items > 0
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl_seconds: i64) -> bool {
        !self.is_assembled() && (now - self.created_at).num_seconds() >= ttl_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AlbumState {
        AlbumState::new(Uuid::new_v4(), "tenant-a", Uuid::new_v4(), 3, Utc::now())
    }

    #[test]
    fn incomplete_until_expected_items_received() {
        let mut s = state();
        assert!(!s.is_complete());
        s.received.insert(Uuid::new_v4(), VisionSummary { post_id: Uuid::new_v4(), position: 0, labels: vec![], description: String::new(), ocr_text: String::new(), is_meme: false });
        assert!(!s.is_complete());
    }

    #[test]
    fn expires_after_ttl_unless_assembled() {
        let mut s = AlbumState::new(Uuid::new_v4(), "t", Uuid::new_v4(), 2, Utc::now() - chrono::Duration::seconds(100));
        assert!(s.is_expired(Utc::now(), 60));
        s.assembled_at = Some(Utc::now());
        assert!(!s.is_expired(Utc::now(), 60));
    }
}
