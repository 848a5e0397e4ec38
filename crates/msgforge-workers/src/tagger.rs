//! Tagger (§4.9): consumes `posts.parsed`, generates tags, optionally folding in an
//! existing vision summary so short-caption-plus-media posts still tag usefully.

use async_trait::async_trait;
use msgforge_core::domain::{EnrichmentKind, EnrichmentStatus};
use msgforge_core::error::PipelineError;
use msgforge_core::events::{EventHeaders, PostsParsed, PostsTagged, Stream, TagTrigger};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, HandleOutcome, StreamEntry};
use msgforge_store::{compute_params_hash, EnrichmentRepo, UpsertRequest};
use std::sync::Arc;

use crate::collaborators::TagGenerator;

pub struct Tagger<B: EventBus> {
    bus: Arc<B>,
    enrichment_repo: Arc<EnrichmentRepo>,
    tag_generator: Arc<dyn TagGenerator>,
}

impl<B: EventBus> Tagger<B> {
    pub fn new(bus: Arc<B>, enrichment_repo: Arc<EnrichmentRepo>, tag_generator: Arc<dyn TagGenerator>) -> Self {
        Self { bus, enrichment_repo, tag_generator }
    }

    async fn process(&self, event: PostsParsed) -> Result<(), PipelineError> {
        let vision = self.enrichment_repo.get(event.post_id, EnrichmentKind::Vision).await?;

        let (input_text, vision_version, features_hash) = match &vision {
            Some(row) => {
                let description = row.data.get("description").and_then(|v| v.as_str()).unwrap_or_default();
                let ocr_text = row.data.get("ocr").and_then(|o| o.get("text")).and_then(|v| v.as_str()).unwrap_or_default();
                let combined = format!("{}\n{}\n{}", event.text, description, ocr_text);
                let vision_version = row.data.get("vision_version").and_then(|v| v.as_i64());
                let features_hash = row.data.get("features_hash").and_then(|v| v.as_str()).map(str::to_string);
                (combined, vision_version, features_hash)
            }
            None => (event.text.clone(), None, None),
        };

        let tags = self.tag_generator.generate(&input_text).await?;
        let tags_sorted = sorted(&tags);
        let tags_hash = compute_params_hash("tags", "v1", &serde_json::json!({ "tags": tags_sorted }));
        let tags_version = chrono::Utc::now().timestamp_millis();

        let data = serde_json::json!({
            "tags": tags,
            "tags_hash": tags_hash,
            "tags_version": tags_version,
            "source_text": event.text,
            "vision_version": vision_version,
            "features_hash": features_hash,
        });

        self.enrichment_repo
            .upsert(UpsertRequest {
                post_id: event.post_id,
                kind: EnrichmentKind::Tags,
                provider: self.tag_generator_name(),
                data,
                status: EnrichmentStatus::Ok,
                error: None,
                params_hash: Some(tags_hash.clone()),
            })
            .await?;

        let payload = PostsTagged { post_id: event.post_id, tags, tags_hash, trigger: TagTrigger::Initial, vision_version: None };
        let headers = EventHeaders::new(format!("tags:{}", event.post_id), Some(event.tenant_id));
        publish_typed(self.bus.as_ref(), Stream::PostsTagged, headers, &payload).await?;
        Ok(())
    }

    fn tag_generator_name(&self) -> String {
        "tag_generator".to_string()
    }
}

fn sorted(tags: &[String]) -> Vec<String> {
    let mut v = tags.to_vec();
    v.sort();
    v
}

pub struct TaggerHandler<B: EventBus>(pub Arc<Tagger<B>>, pub u32);

#[async_trait]
impl<B: EventBus> EventHandler for TaggerHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: PostsParsed = match entry.payload() {
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
    fn sorted_tags_are_order_independent_for_hashing() {
        assert_eq!(sorted(&["b".to_string(), "a".to_string()]), vec!["a".to_string(), "b".to_string()]);
    }
}
