//! Retagger (§4.9): consumes `posts.vision.analyzed` — never `posts.tagged`, which is
//! what keeps the tagging loop from feeding on its own output. Regenerates tags only
//! when the vision result actually changed the content worth tagging.

use async_trait::async_trait;
use msgforge_core::domain::{EnrichmentKind, EnrichmentStatus};
use msgforge_core::error::PipelineError;
use msgforge_core::events::{EventHeaders, PostsTagged, PostsVisionAnalyzed, Stream, TagTrigger};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, HandleOutcome, StreamEntry};
use msgforge_store::{compute_params_hash, EnrichmentRepo, UpsertRequest};
use std::sync::Arc;

use crate::collaborators::TagGenerator;

pub struct Retagger<B: EventBus> {
    bus: Arc<B>,
    enrichment_repo: Arc<EnrichmentRepo>,
    tag_generator: Arc<dyn TagGenerator>,
}

impl<B: EventBus> Retagger<B> {
    pub fn new(bus: Arc<B>, enrichment_repo: Arc<EnrichmentRepo>, tag_generator: Arc<dyn TagGenerator>) -> Self {
        Self { bus, enrichment_repo, tag_generator }
    }

    async fn process(&self, event: PostsVisionAnalyzed) -> Result<(), PipelineError> {
        let Some(existing) = self.enrichment_repo.get(event.post_id, EnrichmentKind::Tags).await? else {
            // No tags yet: the initial tagger hasn't run, nothing to retag.
            return Ok(());
        };

        let stored_vision_version = existing.data.get("vision_version").and_then(|v| v.as_i64()).unwrap_or(0);
        let stored_features_hash = existing.data.get("features_hash").and_then(|v| v.as_str());

        let should_retag = event.vision_version > stored_vision_version || stored_features_hash != Some(event.features_hash.as_str());
        if !should_retag {
            return Ok(());
        }

        let source_text = existing.data.get("source_text").and_then(|v| v.as_str()).unwrap_or_default();
        let combined = format!("{}\n{}\n{}", source_text, event.vision.description, event.vision.ocr.text);

        let tags = self.tag_generator.generate(&combined).await?;
        let tags_sorted = sorted(&tags);
        let tags_hash = compute_params_hash("tags", "v1", &serde_json::json!({ "tags": tags_sorted }));
        let tags_version = chrono::Utc::now().timestamp_millis();

        let data = serde_json::json!({
            "tags": tags,
            "tags_hash": tags_hash,
            "tags_version": tags_version,
            "source_text": source_text,
            "vision_version": event.vision_version,
            "features_hash": event.features_hash,
        });

        self.enrichment_repo
            .upsert(UpsertRequest {
                post_id: event.post_id,
                kind: EnrichmentKind::Tags,
                provider: "tag_generator".to_string(),
                data,
                status: EnrichmentStatus::Ok,
                error: None,
                params_hash: Some(tags_hash.clone()),
            })
            .await?;

        let payload = PostsTagged { post_id: event.post_id, tags, tags_hash, trigger: TagTrigger::VisionRetag, vision_version: Some(event.vision_version) };
        let headers = EventHeaders::new(format!("retag:{}", event.post_id), Some(event.tenant_id));
        publish_typed(self.bus.as_ref(), Stream::PostsTagged, headers, &payload).await?;
        Ok(())
    }
}

fn sorted(tags: &[String]) -> Vec<String> {
    let mut v = tags.to_vec();
    v.sort();
    v
}

pub struct RetaggerHandler<B: EventBus>(pub Arc<Retagger<B>>, pub u32);

#[async_trait]
impl<B: EventBus> EventHandler for RetaggerHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: PostsVisionAnalyzed = match entry.payload() {
            Ok(event) => event,
            Err(error) => return classify_failure_with_retry(&error, entry.delivery_count, self.1),
        };
        match self.0.process(event).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_tags_match_tagger_helper_semantics() {
        assert_eq!(sorted(&["z".to_string(), "a".to_string()]), vec!["a".to_string(), "z".to_string()]);
    }
}
