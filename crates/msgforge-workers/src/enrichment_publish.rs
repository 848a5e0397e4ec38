//! Enrichment publisher (§6 stream table: "Enrichment" produces `posts.enriched`).
//! `posts.tagged` is the natural trigger — tags are the last enrichment stage most posts
//! go through — so this assembles the final cross-kind view and hands it to the Indexer.

use async_trait::async_trait;
use msgforge_core::domain::EnrichmentKind;
use msgforge_core::error::PipelineError;
use msgforge_core::events::{EventHeaders, PostsEnriched, PostsTagged, Stream};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, HandleOutcome, StreamEntry};
use msgforge_store::{AlbumRepo, EnrichmentRepo, PostRepo};
use std::sync::Arc;

pub struct EnrichmentPublisher<B: EventBus> {
    bus: Arc<B>,
    post_repo: Arc<PostRepo>,
    enrichment_repo: Arc<EnrichmentRepo>,
    album_repo: Arc<AlbumRepo>,
}

impl<B: EventBus> EnrichmentPublisher<B> {
    pub fn new(bus: Arc<B>, post_repo: Arc<PostRepo>, enrichment_repo: Arc<EnrichmentRepo>, album_repo: Arc<AlbumRepo>) -> Self {
        Self { bus, post_repo, enrichment_repo, album_repo }
    }

    async fn process(&self, event: PostsTagged) -> Result<(), PipelineError> {
        let Some(post) = self.post_repo.get(event.post_id).await? else {
            // Post was never persisted (shouldn't happen once tags exist, but ingestion
            // and enrichment are independently retried and can race on deletion/replay).
            return Ok(());
        };

        let vision = self.enrichment_repo.get(event.post_id, EnrichmentKind::Vision).await?.map(|row| row.data);
        let crawl = self.enrichment_repo.get(event.post_id, EnrichmentKind::Crawl).await?.map(|row| row.data);
        let album_id = self.album_repo.find_group_for_post(event.post_id).await?.map(|group| group.id);

        let payload = PostsEnriched {
            post_id: event.post_id,
            tenant_id: post.tenant_id.clone(),
            text: post.text,
            tags: event.tags,
            album_id,
            vision,
            crawl,
        };
        let headers = EventHeaders::new(format!("enriched:{}", event.post_id), Some(post.tenant_id));
        publish_typed(self.bus.as_ref(), Stream::PostsEnriched, headers, &payload).await?;
        Ok(())
    }
}

pub struct EnrichmentPublisherHandler<B: EventBus>(pub Arc<EnrichmentPublisher<B>>, pub u32);

#[async_trait]
impl<B: EventBus> EventHandler for EnrichmentPublisherHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: PostsTagged = match entry.payload() {
            Ok(event) => event,
            Err(error) => return classify_failure_with_retry(&error, entry.delivery_count, self.1),
        };
        match self.0.process(event).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.1),
        }
    }
}
