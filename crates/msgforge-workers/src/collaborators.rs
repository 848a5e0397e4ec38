//! Trait boundaries for the external collaborators spec §1 puts out of scope: the vision/
//! tagging LLM providers, the local OCR fallback, the web crawler, and the vector/graph
//! stores. Each worker depends on the trait, never a concrete client, so tests can swap in
//! `mockall` automocks or `wiremock` HTTP stubs without touching worker logic.

use async_trait::async_trait;
use msgforge_core::error::PipelineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub tenant_id: String,
    pub sha256: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionOutput {
    pub model: String,
    pub labels: Vec<String>,
    pub description: String,
    pub is_meme: bool,
}

/// An RPC-style LLM vision endpoint (§4.6 step 3). Failures should surface as
/// [`PipelineError::ExternalUnavailable`] so the caller's circuit breaker and retry
/// policy classify them correctly.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn analyze(&self, request: VisionRequest) -> Result<VisionOutput, PipelineError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub confidence: f32,
}

/// Local OCR fallback used when the vision provider is denied by policy, budget, or the
/// circuit breaker (§4.6 steps 1-3).
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn recognize(&self, bytes: &[u8], mime: &str) -> Result<OcrOutput, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub canonical_url: String,
    pub timeout_seconds: u64,
    pub max_bytes: u64,
    pub max_redirects: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlArtifact {
    pub markdown: String,
    pub title: Option<String>,
    pub fetched_bytes: u64,
}

/// "A URL-in, markdown-out service" (§1). Errors distinguish `timeout`/`network`/`parse`
/// per §4.8's error categories; the enricher maps those onto [`PipelineError`] variants.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Crawler: Send + Sync {
    async fn fetch(&self, request: CrawlRequest) -> Result<CrawlArtifact, PipelineError>;
}

/// Generates tags from a post's text (optionally enriched with a vision summary). Out of
/// scope per §1 ("LLM prompt engineering"); specified only by this contract.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait TagGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> Result<Vec<String>, PipelineError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub post_id: uuid::Uuid,
    pub channel_id: uuid::Uuid,
    pub tenant_id: String,
    pub tags: Vec<String>,
    pub album_id: Option<uuid::Uuid>,
    pub vision_labels: Vec<String>,
    pub is_meme: bool,
    pub posted_at: chrono::DateTime<chrono::Utc>,
}

/// Per-tenant vector collection writer (§4.11): collection name is `user_{tenant}_channels`.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<String, PipelineError>;
}

#[derive(Debug, Clone)]
pub enum GraphNode {
    Post { id: uuid::Uuid },
    Topic { name: String },
    Album { id: uuid::Uuid },
    Channel { id: uuid::Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEdgeKind {
    HasTopic,
    Contains,
    HasAlbum,
    RelatedTo,
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from: GraphNode,
    pub to: GraphNode,
    pub kind: GraphEdgeKind,
    /// Only meaningful for `RelatedTo`: `0.5 + 0.1 * weight`, clamped to 1.0 (§4.11).
    pub weight: Option<f64>,
}

/// Graph store writer (§4.11): nodes `(Post, Topic, Album, Channel)`, edges
/// `HAS_TOPIC`/`CONTAINS`/`HAS_ALBUM`/`RELATED_TO`.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), PipelineError>;
    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), PipelineError>;
    /// Current co-occurrence weight between two topics, used to compute `RELATED_TO`
    /// similarity before it is incremented and written back.
    async fn topic_cooccurrence_weight(&self, a: &str, b: &str) -> Result<u32, PipelineError>;
    async fn bump_topic_cooccurrence(&self, a: &str, b: &str) -> Result<u32, PipelineError>;
}
