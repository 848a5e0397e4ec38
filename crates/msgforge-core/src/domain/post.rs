//! Post and its per-post detail side-tables (§3).

use super::TelegramId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single Telegram channel/group message. Immutable except for derived flags
/// (`has_media`) computed at ingest time; unique on `(channel_id, message_seq)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub tenant_id: String,
    /// Monotonically increasing per-channel sequence, derived from the Telegram message id.
    pub message_seq: i64,
    pub text: String,
    pub posted_at: DateTime<Utc>,
    /// Present when the message belongs to a Telegram album.
    pub grouped_id: Option<TelegramId>,
    pub has_media: bool,
}

impl Post {
    pub fn new(
        channel_id: Uuid,
        tenant_id: impl Into<String>,
        message_seq: i64,
        text: impl Into<String>,
        posted_at: DateTime<Utc>,
        grouped_id: Option<TelegramId>,
        has_media: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id,
            tenant_id: tenant_id.into(),
            message_seq,
            text: text.into(),
            posted_at,
            grouped_id,
            has_media,
        }
    }

    pub fn is_album_member(&self) -> bool {
        self.grouped_id.is_some()
    }
}

/// Idempotent on a natural key carried in the Telegram payload; content model beyond that
/// is intentionally unspecified (spec §9 Open Question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostForward {
    pub post_id: Uuid,
    pub origin_channel_username: Option<String>,
    pub origin_message_id: Option<TelegramId>,
    pub forwarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReaction {
    pub post_id: Uuid,
    pub emoji: String,
    pub count: i32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReply {
    pub post_id: Uuid,
    pub reply_to_message_seq: i64,
    pub recorded_at: DateTime<Utc>,
}
