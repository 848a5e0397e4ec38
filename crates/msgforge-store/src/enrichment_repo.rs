//! The enrichment repository (§4.5): single write path for all `post_enrichment` rows,
//! with the `COALESCE`-guarded upsert and legacy scalar-column sync.

use chrono::Utc;
use diesel::prelude::*;
use msgforge_core::domain::{EnrichmentKind, EnrichmentStatus, PostEnrichment};
use msgforge_core::error::PipelineError;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{parse_kind, parse_status, PostEnrichmentRow};
use crate::pool::{run_blocking, DbPool};
use crate::schema::post_enrichment;

pub struct UpsertRequest {
    pub post_id: Uuid,
    pub kind: EnrichmentKind,
    pub provider: String,
    pub data: serde_json::Value,
    pub status: EnrichmentStatus,
    pub error: Option<String>,
    pub params_hash: Option<String>,
}

pub struct EnrichmentRepo {
    pool: DbPool,
}

impl EnrichmentRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// `INSERT ... ON CONFLICT (post_id, kind) DO UPDATE SET provider=EXCLUDED.provider,
    /// params_hash=COALESCE(EXCLUDED.params_hash, post_enrichment.params_hash), data=...,
    /// status=..., error=..., updated_at=now()`. Also syncs legacy scalar columns for
    /// `vision`/`tags` kinds so existing consumers that read those columns directly keep
    /// working.
    pub async fn upsert(&self, req: UpsertRequest) -> Result<(), PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| Self::upsert_sync(conn, req)).await
    }

    fn upsert_sync(conn: &mut PgConnection, req: UpsertRequest) -> Result<(), PipelineError> {
        let now = Utc::now();
        let legacy = legacy_columns(req.kind, &req.data);

        let row = PostEnrichmentRow {
            post_id: req.post_id,
            kind: req.kind.as_str().to_string(),
            provider: req.provider,
            params_hash: req.params_hash,
            data: req.data,
            status: status_str(req.status).to_string(),
            error: req.error,
            updated_at: now,
            description: legacy.description,
            classification: legacy.classification,
            ocr_text: legacy.ocr_text,
            tags: legacy.tags,
        };

        let result = diesel::insert_into(post_enrichment::table)
            .values(&row)
            .on_conflict((post_enrichment::post_id, post_enrichment::kind))
            .do_update()
            .set((
                post_enrichment::provider.eq(&row.provider),
                post_enrichment::params_hash.eq(diesel::dsl::sql::<diesel::sql_types::Nullable<diesel::sql_types::Text>>(
                    "COALESCE(EXCLUDED.params_hash, post_enrichment.params_hash)",
                )),
                post_enrichment::data.eq(&row.data),
                post_enrichment::status.eq(&row.status),
                post_enrichment::error.eq(&row.error),
                post_enrichment::updated_at.eq(now),
                post_enrichment::description.eq(&row.description),
                post_enrichment::classification.eq(&row.classification),
                post_enrichment::ocr_text.eq(&row.ocr_text),
                post_enrichment::tags.eq(&row.tags),
            ))
            .execute(conn);

        match result {
            Ok(_) => Ok(()),
            Err(diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, info)) => {
                Err(PipelineError::IntegrityViolation { message: format!("post_enrichment unique violation (should be unreachable via upsert): {}", info.message()) })
            }
            Err(e) => Err(PipelineError::from(e)),
        }
    }

    pub async fn get(&self, post_id: Uuid, kind: EnrichmentKind) -> Result<Option<PostEnrichment>, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            post_enrichment::table
                .filter(post_enrichment::post_id.eq(post_id))
                .filter(post_enrichment::kind.eq(kind.as_str()))
                .first::<PostEnrichmentRow>(conn)
                .optional()
                .map(|opt| opt.map(Into::into))
                .map_err(PipelineError::from)
        })
        .await
    }

    pub async fn list_latest(&self, post_id: Uuid) -> Result<Vec<PostEnrichment>, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            post_enrichment::table
                .filter(post_enrichment::post_id.eq(post_id))
                .load::<PostEnrichmentRow>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(PipelineError::from)
        })
        .await
    }
}

struct LegacyColumns {
    description: Option<String>,
    classification: Option<String>,
    ocr_text: Option<String>,
    tags: Option<Vec<String>>,
}

fn legacy_columns(kind: EnrichmentKind, data: &serde_json::Value) -> LegacyColumns {
    match kind {
        EnrichmentKind::Vision => LegacyColumns {
            description: data.get("description").and_then(|v| v.as_str()).map(str::to_string),
            classification: data.get("labels").and_then(|v| v.as_array()).and_then(|a| a.first()).and_then(|v| v.as_str()).map(str::to_string),
            ocr_text: data.get("ocr").and_then(|o| o.get("text")).and_then(|v| v.as_str()).map(str::to_string),
            tags: None,
        },
        EnrichmentKind::Tags => LegacyColumns {
            description: None,
            classification: None,
            ocr_text: None,
            tags: data.get("tags").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()),
        },
        _ => LegacyColumns { description: None, classification: None, ocr_text: None, tags: None },
    }
}

fn status_str(status: EnrichmentStatus) -> &'static str {
    match status {
        EnrichmentStatus::Ok => "ok",
        EnrichmentStatus::Partial => "partial",
        EnrichmentStatus::Error => "error",
    }
}

/// Stable JSON encoding (sorted keys, no insignificant whitespace) then SHA-256, hex.
/// Two calls with the same `(model, version, inputs)` must return byte-identical hashes.
pub fn compute_params_hash(model: &str, version: &str, inputs: &serde_json::Value) -> String {
    let canonical = canonicalize(inputs);
    let joined = format!("{model}\u{1}{version}\u{1}{canonical}");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recursively sorts object keys so `serde_json::Value::to_string()` is deterministic
/// regardless of insertion order; array order is preserved since it is significant.
fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted = serde_json::Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for k in keys {
                    sorted.insert(k.clone(), sort(&map[k]));
                }
                serde_json::Value::Object(sorted)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_hash_is_stable_regardless_of_key_order() {
        let a = serde_json::json!({ "b": 1, "a": 2 });
        let b = serde_json::json!({ "a": 2, "b": 1 });
        assert_eq!(compute_params_hash("gpt", "v1", &a), compute_params_hash("gpt", "v1", &b));
    }

    #[test]
    fn params_hash_differs_on_model_change() {
        let inputs = serde_json::json!({ "a": 1 });
        assert_ne!(compute_params_hash("gpt-4", "v1", &inputs), compute_params_hash("gpt-5", "v1", &inputs));
    }

    #[test]
    fn legacy_columns_extract_vision_fields() {
        let data = serde_json::json!({ "description": "a cat", "labels": ["animal"], "ocr": { "text": "meow" } });
        let legacy = legacy_columns(EnrichmentKind::Vision, &data);
        assert_eq!(legacy.description.as_deref(), Some("a cat"));
        assert_eq!(legacy.ocr_text.as_deref(), Some("meow"));
    }

    #[test]
    fn legacy_columns_extract_tags_array() {
        let data = serde_json::json!({ "tags": ["a", "b"] });
        let legacy = legacy_columns(EnrichmentKind::Tags, &data);
        assert_eq!(legacy.tags, Some(vec!["a".to_string(), "b".to_string()]));
    }
}
