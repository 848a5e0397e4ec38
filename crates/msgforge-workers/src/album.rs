//! Album Assembler (§4.7): the core cross-event state machine. Aggregates per-post
//! vision results belonging to the same Telegram `grouped_id` into one enrichment and
//! emits `album.assembled` exactly once, even when an album's posts arrive across
//! separate ingest batches minutes apart.

use async_trait::async_trait;
use chrono::Utc;
use msgforge_core::domain::VisionSummary;
use msgforge_core::error::PipelineError;
use msgforge_core::events::{AlbumAssembled, AlbumAssemblyExpired, AlbumsParsed, EventHeaders, PostsVisionAnalyzed, Stream};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, FastStore, HandleOutcome, StreamEntry};
use msgforge_store::AlbumRepo;
use msgforge_store::MediaStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA_VERSION: u32 = 1;
const EXPIRY_INDEX_KEY: &str = "album:pending_expiry";

fn state_key(group_id: Uuid) -> String {
    format!("album:state:{group_id}")
}

/// Mirrors [`msgforge_core::domain::AlbumState`] but round-trips through the Lua CAS
/// script below, so it carries its own (de)serialization rather than reusing the domain
/// type's test-oriented helpers directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CasState {
    group_id: Uuid,
    tenant_id: String,
    channel_id: Uuid,
    expected_items: i32,
    received: HashMap<Uuid, VisionSummary>,
    created_at: chrono::DateTime<Utc>,
    assembled_at: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    just_completed: bool,
}

/// `KEYS[1]` is the state key; `ARGV[1]` is a JSON-encoded `{op, ...}` command. Both
/// transitions read-modify-write the same key atomically, which is what makes concurrent
/// completion of the album's last two items race-free (§4.7).
static CAS_SCRIPT_SRC: &str = r#"
local raw = redis.call('GET', KEYS[1])
local cmd = cjson.decode(ARGV[1])
local state

if raw then
    state = cjson.decode(raw)
else
    state = nil
end

if cmd.op == 'create_or_grow' then
    if state == nil then
        state = {
            group_id = cmd.group_id,
            tenant_id = cmd.tenant_id,
            channel_id = cmd.channel_id,
            expected_items = cmd.expected_items,
            received = {},
            created_at = cmd.now,
            assembled_at = cjson.null,
            just_completed = false,
        }
    else
        if cmd.expected_items > state.expected_items then
            state.expected_items = cmd.expected_items
        end
        state.just_completed = false
    end
elseif cmd.op == 'add_vision' then
    if state == nil then
        return cjson.encode({ missing = true })
    end
    state.received[cmd.post_id] = cmd.summary
    local count = 0
    for _ in pairs(state.received) do count = count + 1 end
    state.just_completed = false
    if count >= state.expected_items and state.expected_items > 0 and state.assembled_at == cjson.null then
        state.assembled_at = cmd.now
        state.just_completed = true
    end
end

redis.call('SET', KEYS[1], cjson.encode(state), 'EX', cmd.ttl_seconds)
return cjson.encode(state)
"#;

pub struct AlbumAssembler<B: EventBus> {
    bus: Arc<B>,
    fast_store: FastStore,
    album_repo: Arc<AlbumRepo>,
    media_store: Arc<MediaStore>,
    assembly_ttl_seconds: i64,
    cas_script: redis::Script,
}

impl<B: EventBus> AlbumAssembler<B> {
    pub fn new(bus: Arc<B>, fast_store: FastStore, album_repo: Arc<AlbumRepo>, media_store: Arc<MediaStore>, assembly_ttl_seconds: i64) -> Self {
        Self { bus, fast_store, album_repo, media_store, assembly_ttl_seconds, cas_script: redis::Script::new(CAS_SCRIPT_SRC) }
    }

    pub async fn handle_albums_parsed(&self, event: AlbumsParsed) -> Result<(), PipelineError> {
        let now = Utc::now();
        let cmd = serde_json::json!({
            "op": "create_or_grow",
            "group_id": event.group_id,
            "tenant_id": event.tenant_id,
            "channel_id": event.channel_id,
            "expected_items": event.items_count,
            "now": now,
            "ttl_seconds": self.assembly_ttl_seconds,
        });
        self.fast_store.eval_cas(&self.cas_script, &state_key(event.group_id), &cmd.to_string()).await?;

        let expiry_score = (now + chrono::Duration::seconds(self.assembly_ttl_seconds)).timestamp() as f64;
        self.fast_store.zadd(EXPIRY_INDEX_KEY, &event.group_id.to_string(), expiry_score).await?;
        Ok(())
    }

    pub async fn handle_vision_analyzed(&self, event: PostsVisionAnalyzed) -> Result<(), PipelineError> {
        let Some(group) = self.album_repo.find_group_for_post(event.post_id).await? else {
            return Ok(());
        };
        let position = group.post_ids.iter().position(|p| *p == event.post_id).unwrap_or(0) as i32;

        let summary = VisionSummary {
            post_id: event.post_id,
            position,
            labels: event.vision.labels.clone(),
            description: event.vision.description.clone(),
            ocr_text: event.vision.ocr.text.clone(),
            is_meme: event.vision.is_meme,
        };

        let now = Utc::now();
        let cmd = serde_json::json!({
            "op": "add_vision",
            "post_id": event.post_id,
            "summary": summary,
            "now": now,
            "ttl_seconds": self.assembly_ttl_seconds,
        });
        let raw = self.fast_store.eval_cas(&self.cas_script, &state_key(group.id), &cmd.to_string()).await?;

        let value: serde_json::Value = serde_json::from_str(&raw)?;
        if value.get("missing").and_then(|v| v.as_bool()).unwrap_or(false) {
            // `albums.parsed` for this group hasn't landed yet (or its state already
            // expired/assembled and was deleted). Leave this entry pending so it gets
            // redelivered once the group state exists, rather than dropping the vision
            // result on the floor.
            return Err(PipelineError::transient(format!("album state missing for group {}", group.id)));
        }
        let state: CasState = serde_json::from_value(value)?;

        if state.just_completed {
            self.assemble(group.id, group.tenant_id, state).await?;
        }
        Ok(())
    }

    async fn assemble(&self, group_id: Uuid, tenant_id: String, state: CasState) -> Result<(), PipelineError> {
        let mut items: Vec<&VisionSummary> = state.received.values().collect();
        items.sort_by_key(|s| s.position);

        let mut labels = Vec::new();
        let mut seen_labels = std::collections::HashSet::new();
        for item in &items {
            for label in &item.labels {
                if seen_labels.insert(label.clone()) {
                    labels.push(label.clone());
                }
            }
        }
        let description = items.iter().map(|s| s.description.as_str()).filter(|d| !d.is_empty()).collect::<Vec<_>>().join(" ");
        let ocr_text = items.iter().map(|s| s.ocr_text.as_str()).filter(|d| !d.is_empty()).collect::<Vec<_>>().join("\n");
        let has_meme = items.iter().any(|s| s.is_meme);

        let aggregated = serde_json::json!({
            "model": "v1",
            "items_count": items.len(),
            "labels": labels,
            "description": description,
            "ocr_text": ocr_text,
            "has_meme": has_meme,
            "assembled_at": Utc::now(),
        });

        let s3_key = format!("album/{tenant_id}/{group_id}_vision_summary_v{SCHEMA_VERSION}.json");
        self.media_store.put_json(&tenant_id, &s3_key, &aggregated).await?;
        self.album_repo.write_enrichment(group_id, aggregated.clone()).await?;

        let assembly_lag_seconds = (Utc::now() - state.created_at).num_seconds();
        let payload = AlbumAssembled {
            album_id: group_id,
            tenant_id: tenant_id.clone(),
            items_count: state.expected_items,
            items_analyzed: items.len() as i32,
            vision_summary: aggregated,
            s3_key,
            assembly_lag_seconds,
        };
        let headers = EventHeaders::new(format!("album:{group_id}"), Some(tenant_id));
        publish_typed(self.bus.as_ref(), Stream::AlbumAssembled, headers, &payload).await?;

        self.fast_store.delete(&state_key(group_id)).await?;
        self.fast_store.zrem(EXPIRY_INDEX_KEY, &group_id.to_string()).await?;
        Ok(())
    }

    /// Background sweep (§4.7 transition 4): finds albums whose `assembly_ttl` has
    /// elapsed without completing, emits `album.assembly_expired` with the partial set,
    /// and drops the state record. Runs under the task supervisor on a fixed interval.
    pub async fn sweep_expired(&self) -> Result<usize, PipelineError> {
        let now = Utc::now().timestamp() as f64;
        let candidates = self.fast_store.zpop_expired(EXPIRY_INDEX_KEY, now, 100).await?;

        let mut expired_count = 0;
        for group_id_str in candidates {
            let Ok(group_id) = group_id_str.parse::<Uuid>() else { continue };
            let Some(state): Option<CasState> = self.fast_store.get_json(&state_key(group_id)).await? else {
                continue;
            };
            if state.assembled_at.is_some() {
                continue;
            }

            let payload = AlbumAssemblyExpired {
                album_id: group_id,
                tenant_id: state.tenant_id.clone(),
                items_count: state.expected_items,
                items_received: state.received.len() as i32,
                received_post_ids: state.received.keys().copied().collect(),
            };
            let headers = EventHeaders::new(format!("album:expired:{group_id}"), Some(state.tenant_id));
            publish_typed(self.bus.as_ref(), Stream::AlbumAssemblyExpired, headers, &payload).await?;
            self.fast_store.delete(&state_key(group_id)).await?;
            expired_count += 1;
        }
        Ok(expired_count)
    }
}

pub struct AlbumsParsedHandler<B: EventBus>(pub Arc<AlbumAssembler<B>>, pub u32);
pub struct VisionAnalyzedHandler<B: EventBus>(pub Arc<AlbumAssembler<B>>, pub u32);

#[async_trait]
impl<B: EventBus> EventHandler for AlbumsParsedHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: AlbumsParsed = match entry.payload() {
            Ok(event) => event,
            Err(error) => return classify_failure_with_retry(&error, entry.delivery_count, self.1),
        };
        match self.0.handle_albums_parsed(event).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.1),
        }
    }
}

#[async_trait]
impl<B: EventBus> EventHandler for VisionAnalyzedHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: PostsVisionAnalyzed = match entry.payload() {
            Ok(event) => event,
            Err(error) => return classify_failure_with_retry(&error, entry.delivery_count, self.1),
        };
        match self.0.handle_vision_analyzed(event).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_state_round_trips_through_json() {
        let state = CasState {
            group_id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            channel_id: Uuid::new_v4(),
            expected_items: 3,
            received: HashMap::new(),
            created_at: Utc::now(),
            assembled_at: None,
            just_completed: false,
        };
        let json = serde_json::to_string(&state).unwrap();
        let parsed: CasState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.group_id, state.group_id);
        assert_eq!(parsed.expected_items, 3);
    }

    #[test]
    fn cas_script_compiles() {
        let _ = redis::Script::new(CAS_SCRIPT_SRC);
    }

    #[test]
    fn missing_sentinel_is_detected_before_cas_state_deserialization() {
        let raw = r#"{"missing":true}"#;
        let value: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert!(value.get("missing").and_then(|v| v.as_bool()).unwrap_or(false));
        assert!(serde_json::from_value::<CasState>(value).is_err());
    }
}
