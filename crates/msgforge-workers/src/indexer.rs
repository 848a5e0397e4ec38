//! Indexer (§4.11): the terminal stage. Consumes `posts.enriched` to write the vector
//! and graph views of a post, and `album.assembled` to register the album's graph node
//! ahead of (or alongside) its member posts' `HAS_ALBUM` edges.

use async_trait::async_trait;
use msgforge_core::error::PipelineError;
use msgforge_core::events::{AlbumAssembled, EventHeaders, PostsEnriched, PostsIndexed, Stream};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, HandleOutcome, StreamEntry};
use msgforge_store::PostRepo;
use std::sync::Arc;

use crate::collaborators::{GraphEdge, GraphEdgeKind, GraphNode, GraphStore, VectorRecord, VectorStore};

/// Base similarity plus the per-co-occurrence increment from §4.11: `0.5 + 0.1 * weight`,
/// clamped to 1.0.
fn related_to_weight(weight: u32) -> f64 {
    (0.5 + 0.1 * weight as f64).min(1.0)
}

fn vector_collection(tenant_id: &str) -> String {
    format!("user_{tenant_id}_channels")
}

pub struct Indexer<B: EventBus> {
    bus: Arc<B>,
    post_repo: Arc<PostRepo>,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
}

impl<B: EventBus> Indexer<B> {
    pub fn new(bus: Arc<B>, post_repo: Arc<PostRepo>, vector_store: Arc<dyn VectorStore>, graph_store: Arc<dyn GraphStore>) -> Self {
        Self { bus, post_repo, vector_store, graph_store }
    }

    async fn process_enriched(&self, event: PostsEnriched) -> Result<(), PipelineError> {
        let Some(post) = self.post_repo.get(event.post_id).await? else {
            return Err(PipelineError::IntegrityViolation { message: format!("posts.enriched for unknown post {}", event.post_id) });
        };

        let vision_labels: Vec<String> = event
            .vision
            .as_ref()
            .and_then(|v| v.get("labels"))
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let is_meme = event.vision.as_ref().and_then(|v| v.get("is_meme")).and_then(|v| v.as_bool()).unwrap_or(false);

        let collection = vector_collection(&event.tenant_id);
        let record = VectorRecord {
            post_id: event.post_id,
            channel_id: post.channel_id,
            tenant_id: event.tenant_id.clone(),
            tags: event.tags.clone(),
            album_id: event.album_id,
            vision_labels,
            is_meme,
            posted_at: post.posted_at,
        };
        let vector_id = self.vector_store.upsert(&collection, record).await?;

        self.graph_store.upsert_node(GraphNode::Post { id: event.post_id }).await?;
        self.graph_store.upsert_node(GraphNode::Channel { id: post.channel_id }).await?;
        self.graph_store
            .upsert_edge(GraphEdge { from: GraphNode::Channel { id: post.channel_id }, to: GraphNode::Post { id: event.post_id }, kind: GraphEdgeKind::Contains, weight: None })
            .await?;

        for tag in &event.tags {
            self.graph_store.upsert_node(GraphNode::Topic { name: tag.clone() }).await?;
            self.graph_store
                .upsert_edge(GraphEdge { from: GraphNode::Post { id: event.post_id }, to: GraphNode::Topic { name: tag.clone() }, kind: GraphEdgeKind::HasTopic, weight: None })
                .await?;
        }

        if let Some(album_id) = event.album_id {
            self.graph_store.upsert_node(GraphNode::Album { id: album_id }).await?;
            self.graph_store
                .upsert_edge(GraphEdge { from: GraphNode::Post { id: event.post_id }, to: GraphNode::Album { id: album_id }, kind: GraphEdgeKind::HasAlbum, weight: None })
                .await?;
        }

        self.write_related_to_edges(&event.tags).await?;

        let payload = PostsIndexed { post_id: event.post_id, tenant_id: event.tenant_id.clone(), vector_id, indexed_at: chrono::Utc::now() };
        let headers = EventHeaders::new(format!("indexed:{}", event.post_id), Some(event.tenant_id));
        publish_typed(self.bus.as_ref(), Stream::PostsIndexed, headers, &payload).await?;
        Ok(())
    }

    /// Every unordered pair of tags on the post bumps their co-occurrence counter and
    /// gets a `RELATED_TO` edge scored from the new weight (§4.11).
    async fn write_related_to_edges(&self, tags: &[String]) -> Result<(), PipelineError> {
        let mut sorted_tags = tags.to_vec();
        sorted_tags.sort();
        sorted_tags.dedup();

        for i in 0..sorted_tags.len() {
            for j in (i + 1)..sorted_tags.len() {
                let (a, b) = (&sorted_tags[i], &sorted_tags[j]);
                let weight = self.graph_store.bump_topic_cooccurrence(a, b).await?;
                let similarity = related_to_weight(weight);
                self.graph_store
                    .upsert_edge(GraphEdge {
                        from: GraphNode::Topic { name: a.clone() },
                        to: GraphNode::Topic { name: b.clone() },
                        kind: GraphEdgeKind::RelatedTo,
                        weight: Some(similarity),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn process_album_assembled(&self, event: AlbumAssembled) -> Result<(), PipelineError> {
        self.graph_store.upsert_node(GraphNode::Album { id: event.album_id }).await?;
        Ok(())
    }
}

pub struct PostsEnrichedHandler<B: EventBus>(pub Arc<Indexer<B>>, pub u32);
pub struct AlbumAssembledHandler<B: EventBus>(pub Arc<Indexer<B>>, pub u32);

#[async_trait]
impl<B: EventBus> EventHandler for PostsEnrichedHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: PostsEnriched = match entry.payload() {
            Ok(event) => event,
            Err(error) => return classify_failure_with_retry(&error, entry.delivery_count, self.1),
        };
        match self.0.process_enriched(event).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.1),
        }
    }
}

#[async_trait]
impl<B: EventBus> EventHandler for AlbumAssembledHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: AlbumAssembled = match entry.payload() {
            Ok(event) => event,
            Err(error) => return classify_failure_with_retry(&error, entry.delivery_count, self.1),
        };
        match self.0.process_album_assembled(event).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_to_weight_clamps_at_one() {
        assert_eq!(related_to_weight(0), 0.5);
        assert_eq!(related_to_weight(5), 1.0);
        assert!(related_to_weight(100) <= 1.0);
    }
}
