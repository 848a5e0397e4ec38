//! Content-addressed media objects and the post-to-media link (§3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per distinct content hash. Identical bytes map to exactly one row; deleting
/// the underlying object is only legal once `refs_count` reaches zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaObject {
    /// Lowercase hex SHA-256 of the object bytes — the primary key.
    pub sha256: String,
    pub mime: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub bucket: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub refs_count: i32,
}

impl MediaObject {
    pub fn object_key_for(tenant_id: &str, sha256: &str, ext: &str) -> String {
        let prefix = &sha256[..sha256.len().min(2)];
        format!("media/{tenant_id}/{prefix}/{sha256}.{ext}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaRole {
    Primary,
    Attachment,
}

/// Weak back-edge from a post to a media object; unique on `(post_id, sha256)`. Creation
/// increments `MediaObject::refs_count`, deletion decrements it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMediaMap {
    pub post_id: Uuid,
    pub sha256: String,
    pub position: i32,
    pub role: MediaRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_uses_first_two_hex_chars_as_partition_prefix() {
        let key = MediaObject::object_key_for("tenant-a", "abcdef0123", "jpg");
        assert_eq!(key, "media/tenant-a/ab/abcdef0123.jpg");
    }
}
