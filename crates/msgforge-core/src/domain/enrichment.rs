//! The single enrichment row shape shared by vision, tags, crawl, and general
//! enrichments (§3, §4.5). One row per `(post_id, kind)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentKind {
    Vision,
    Tags,
    Crawl,
    General,
}

impl EnrichmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Tags => "tags",
            Self::Crawl => "crawl",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Ok,
    Partial,
    Error,
}

/// `(post_id, kind)` is the primary key; `params_hash` is the stable hash of
/// `(model, version, inputs)` used to decide whether recomputation is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostEnrichment {
    pub post_id: Uuid,
    pub kind: EnrichmentKind,
    pub provider: String,
    pub params_hash: Option<String>,
    pub data: serde_json::Value,
    pub status: EnrichmentStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
