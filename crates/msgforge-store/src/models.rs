//! Diesel row types and their conversions to/from the shared domain types in
//! `msgforge-core::domain`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use msgforge_core::domain;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = posts)]
pub struct PostRow {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub tenant_id: String,
    pub message_seq: i64,
    pub text: String,
    pub posted_at: DateTime<Utc>,
    pub grouped_id: Option<i64>,
    pub has_media: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&domain::Post> for PostRow {
    fn from(p: &domain::Post) -> Self {
        Self {
            id: p.id,
            channel_id: p.channel_id,
            tenant_id: p.tenant_id.clone(),
            message_seq: p.message_seq,
            text: p.text.clone(),
            posted_at: p.posted_at,
            grouped_id: p.grouped_id,
            has_media: p.has_media,
            created_at: Utc::now(),
        }
    }
}

impl From<PostRow> for domain::Post {
    fn from(r: PostRow) -> Self {
        domain::Post {
            id: r.id,
            channel_id: r.channel_id,
            tenant_id: r.tenant_id,
            message_seq: r.message_seq,
            text: r.text,
            posted_at: r.posted_at,
            grouped_id: r.grouped_id,
            has_media: r.has_media,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = media_objects)]
pub struct MediaObjectRow {
    pub sha256: String,
    pub mime: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub bucket: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub refs_count: i32,
}

impl From<MediaObjectRow> for domain::MediaObject {
    fn from(r: MediaObjectRow) -> Self {
        domain::MediaObject {
            sha256: r.sha256,
            mime: r.mime,
            size_bytes: r.size_bytes,
            object_key: r.object_key,
            bucket: r.bucket,
            first_seen_at: r.first_seen_at,
            last_seen_at: r.last_seen_at,
            refs_count: r.refs_count,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = post_media_map)]
pub struct PostMediaMapRow {
    pub post_id: Uuid,
    pub sha256: String,
    pub position: i32,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = post_enrichment)]
pub struct PostEnrichmentRow {
    pub post_id: Uuid,
    pub kind: String,
    pub provider: String,
    pub params_hash: Option<String>,
    pub data: serde_json::Value,
    pub status: String,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub description: Option<String>,
    pub classification: Option<String>,
    pub ocr_text: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl From<PostEnrichmentRow> for domain::PostEnrichment {
    fn from(r: PostEnrichmentRow) -> Self {
        domain::PostEnrichment {
            post_id: r.post_id,
            kind: parse_kind(&r.kind),
            provider: r.provider,
            params_hash: r.params_hash,
            data: r.data,
            status: parse_status(&r.status),
            error: r.error,
            updated_at: r.updated_at,
        }
    }
}

pub fn parse_kind(s: &str) -> domain::EnrichmentKind {
    match s {
        "vision" => domain::EnrichmentKind::Vision,
        "tags" => domain::EnrichmentKind::Tags,
        "crawl" => domain::EnrichmentKind::Crawl,
        _ => domain::EnrichmentKind::General,
    }
}

pub fn parse_status(s: &str) -> domain::EnrichmentStatus {
    match s {
        "ok" => domain::EnrichmentStatus::Ok,
        "partial" => domain::EnrichmentStatus::Partial,
        _ => domain::EnrichmentStatus::Error,
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = media_groups)]
pub struct MediaGroupRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub channel_id: Uuid,
    pub grouped_id: i64,
    pub items_count: i32,
    pub album_kind: String,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = media_group_items)]
pub struct MediaGroupItemRow {
    pub group_id: Uuid,
    pub position: i32,
    pub post_id: Uuid,
    pub sha256: String,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = post_forwards)]
pub struct PostForwardRow {
    pub post_id: Uuid,
    pub origin_channel_username: Option<String>,
    pub origin_message_id: i64,
    pub forwarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = post_reactions)]
pub struct PostReactionRow {
    pub post_id: Uuid,
    pub emoji: String,
    pub count: i32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = post_replies)]
pub struct PostReplyRow {
    pub post_id: Uuid,
    pub reply_to_message_seq: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = dlq_events)]
pub struct DlqEventRow {
    pub id: Uuid,
    pub source_event: String,
    pub payload_snippet: serde_json::Value,
    pub error_code: String,
    pub attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = episodic_memory)]
pub struct EpisodicMemoryRow {
    pub id: Uuid,
    pub kind: String,
    pub component: String,
    pub tenant_id: Option<String>,
    pub summary: String,
    pub detail: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl From<&domain::EpisodicEvent> for EpisodicMemoryRow {
    fn from(e: &domain::EpisodicEvent) -> Self {
        let kind = match e.kind {
            domain::episodic::EpisodicKind::Run => "run",
            domain::episodic::EpisodicKind::Error => "error",
            domain::episodic::EpisodicKind::Retry => "retry",
        };
        Self {
            id: e.id,
            kind: kind.to_string(),
            component: e.component.clone(),
            tenant_id: e.tenant_id.clone(),
            summary: e.summary.clone(),
            detail: e.detail.clone(),
            occurred_at: e.occurred_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = outbox_events)]
pub struct OutboxEventRow {
    pub id: Uuid,
    pub stream: String,
    pub idempotency_key: String,
    pub headers: serde_json::Value,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = storage_bucket_usage)]
pub struct StorageBucketUsageRow {
    pub tenant_id: String,
    pub bytes_used: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct ChannelRow {
    pub id: Uuid,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct UserChannelRow {
    pub user_id: Uuid,
    pub channel_id: Uuid,
    pub is_active: bool,
}
