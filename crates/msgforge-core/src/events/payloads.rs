//! Per-stream payload shapes, one struct per row of the §6 stream table. The envelope
//! header already carries `trace_id`/`tenant_id`/`occurred_at`, so those are not
//! repeated here unless the stream's contract names them as payload-level keys too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFileRef {
    pub sha256: String,
    pub key: String,
    pub mime: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionOcr {
    pub text: String,
    pub engine: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionPayloadSummary {
    pub provider: String,
    pub model: String,
    pub labels: Vec<String>,
    pub description: String,
    pub ocr: VisionOcr,
    pub is_meme: bool,
}

/// `posts.parsed` — produced by Ingest, consumed by Tagger / Crawl enricher / Vision
/// dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsParsed {
    pub post_id: Uuid,
    pub channel_id: Uuid,
    pub tenant_id: String,
    pub text: String,
    pub has_media: bool,
    pub media_sha256_list: Vec<String>,
    pub grouped_id: Option<i64>,
    pub telegram_post_url: Option<String>,
    pub posted_at: DateTime<Utc>,
}

/// `posts.vision.uploaded` — produced by Ingest, consumed by the Vision Analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsVisionUploaded {
    pub post_id: Uuid,
    pub tenant_id: String,
    pub media_files: Vec<MediaFileRef>,
    pub uploaded_at: DateTime<Utc>,
}

/// `posts.vision.analyzed` — produced by Vision, consumed by Retagger / Album Assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsVisionAnalyzed {
    pub post_id: Uuid,
    pub tenant_id: String,
    pub vision: VisionPayloadSummary,
    pub vision_version: i64,
    pub features_hash: String,
}

/// `albums.parsed` — produced by Ingest, consumed by the Album Assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumsParsed {
    pub group_id: Uuid,
    pub tenant_id: String,
    pub channel_id: Uuid,
    pub grouped_id: i64,
    pub items_count: i32,
    pub post_ids: Vec<Uuid>,
}

/// `album.assembled` — produced by the Assembler, consumed by the Indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumAssembled {
    pub album_id: Uuid,
    pub tenant_id: String,
    pub items_count: i32,
    pub items_analyzed: i32,
    pub vision_summary: serde_json::Value,
    pub s3_key: String,
    pub assembly_lag_seconds: i64,
}

/// `album.assembly_expired` — emitted instead of `album.assembled` when the TTL elapses
/// first (§4.7 transition 4); carries the partial set for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumAssemblyExpired {
    pub album_id: Uuid,
    pub tenant_id: String,
    pub items_count: i32,
    pub items_received: i32,
    pub received_post_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagTrigger {
    Initial,
    VisionRetag,
    Manual,
}

/// `posts.tagged` — produced by Tagger and Retagger, consumed by tag persistence,
/// enrichment, and the crawl trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsTagged {
    pub post_id: Uuid,
    pub tags: Vec<String>,
    pub tags_hash: String,
    pub trigger: TagTrigger,
    pub vision_version: Option<i64>,
}

/// `posts.enriched` — produced by the Enrichment repository, consumed by the Indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsEnriched {
    pub post_id: Uuid,
    pub tenant_id: String,
    pub text: String,
    pub tags: Vec<String>,
    pub album_id: Option<Uuid>,
    pub vision: Option<serde_json::Value>,
    pub crawl: Option<serde_json::Value>,
}

/// `posts.indexed` — produced by the Indexer; downstream consumers (trend detection) are
/// out of scope per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsIndexed {
    pub post_id: Uuid,
    pub tenant_id: String,
    pub vector_id: String,
    pub indexed_at: DateTime<Utc>,
}

/// `posts.crawled` — produced by the Crawl Enricher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsCrawled {
    pub post_id: Uuid,
    pub tenant_id: String,
    pub canonical_url: String,
    pub status: String,
}

/// `<stream>.dlq` — written by any consumer after exhausting `max_deliveries` (§4.1, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqPayload {
    pub base_event: String,
    pub payload_snippet: serde_json::Value,
    pub error_code: String,
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}
