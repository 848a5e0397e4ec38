//! Vision Dispatcher (§4.6 upstream, §6 stream table): consumes `posts.parsed`, resolves
//! each post's `media_sha256_list` against `media_objects` (written by Ingest in the same
//! transaction as the post itself), and republishes the resolved set as
//! `posts.vision.uploaded` — the only producer of that stream, keeping Ingest itself free
//! of a second stage's publish semantics.

use async_trait::async_trait;
use msgforge_core::error::PipelineError;
use msgforge_core::events::{EventHeaders, MediaFileRef, PostsParsed, PostsVisionUploaded, Stream};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, HandleOutcome, StreamEntry};
use msgforge_store::MediaRepo;
use std::collections::HashMap;
use std::sync::Arc;

pub struct VisionDispatcher<B: EventBus> {
    bus: Arc<B>,
    media_repo: Arc<MediaRepo>,
}

impl<B: EventBus> VisionDispatcher<B> {
    pub fn new(bus: Arc<B>, media_repo: Arc<MediaRepo>) -> Self {
        Self { bus, media_repo }
    }

    async fn process(&self, event: PostsParsed) -> Result<(), PipelineError> {
        if !event.has_media || event.media_sha256_list.is_empty() {
            return Ok(());
        }

        let objects = self.media_repo.list_by_sha256(event.media_sha256_list.clone()).await?;
        let by_sha256: HashMap<&str, _> = objects.iter().map(|o| (o.sha256.as_str(), o)).collect();

        let media_files: Vec<MediaFileRef> = event
            .media_sha256_list
            .iter()
            .filter_map(|sha256| {
                by_sha256.get(sha256.as_str()).map(|object| MediaFileRef {
                    sha256: object.sha256.clone(),
                    key: object.object_key.clone(),
                    mime: object.mime.clone(),
                    size_bytes: object.size_bytes,
                })
            })
            .collect();

        if media_files.is_empty() {
            // Every referenced sha256 is missing from `media_objects` — ingest hasn't
            // committed yet, or the rows were since reaped. Either way there is nothing
            // to dispatch this pass.
            tracing::warn!(post_id = %event.post_id, "posts.parsed has_media but no media_objects rows resolved");
            return Ok(());
        }

        let payload = PostsVisionUploaded {
            post_id: event.post_id,
            tenant_id: event.tenant_id.clone(),
            media_files,
            uploaded_at: chrono::Utc::now(),
        };
        let headers = EventHeaders::new(format!("vision_uploaded:{}", event.post_id), Some(event.tenant_id));
        publish_typed(self.bus.as_ref(), Stream::PostsVisionUploaded, headers, &payload).await?;
        Ok(())
    }
}

pub struct VisionDispatchHandler<B: EventBus>(pub Arc<VisionDispatcher<B>>, pub u32);

#[async_trait]
impl<B: EventBus> EventHandler for VisionDispatchHandler<B> {
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
    fn no_media_posts_are_not_dispatched() {
        let event = PostsParsed {
            post_id: uuid::Uuid::new_v4(),
            channel_id: uuid::Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            text: "no media here".to_string(),
            has_media: false,
            media_sha256_list: Vec::new(),
            grouped_id: None,
            telegram_post_url: None,
            posted_at: chrono::Utc::now(),
        };
        assert!(!event.has_media);
        assert!(event.media_sha256_list.is_empty());
    }
}
