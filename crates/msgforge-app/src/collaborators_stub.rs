//! Stand-ins for the collaborator traits spec §1 puts out of scope: no vision/tagging
//! LLM, OCR, crawl, vector, or graph client is specified concretely, so the running
//! process wires a "not configured" implementation of each rather than inventing one.
//! Swapping in a real client is a matter of implementing the trait in
//! [`msgforge_workers::collaborators`] and constructing it here instead.

use async_trait::async_trait;
use msgforge_core::error::PipelineError;
use msgforge_workers::collaborators::{
    CrawlArtifact, CrawlRequest, Crawler, GraphEdge, GraphNode, GraphStore, OcrOutput, OcrProvider, TagGenerator,
    VectorRecord, VectorStore, VisionOutput, VisionProvider, VisionRequest,
};

fn not_configured(what: &str) -> PipelineError {
    PipelineError::ConfigurationError { message: format!("{what} client not configured") }
}

pub struct NotConfiguredVisionProvider;

#[async_trait]
impl VisionProvider for NotConfiguredVisionProvider {
    fn name(&self) -> &'static str {
        "not_configured"
    }

    async fn analyze(&self, _request: VisionRequest) -> Result<VisionOutput, PipelineError> {
        Err(not_configured("vision provider"))
    }
}

pub struct NotConfiguredOcrProvider;

#[async_trait]
impl OcrProvider for NotConfiguredOcrProvider {
    fn name(&self) -> &'static str {
        "not_configured"
    }

    async fn recognize(&self, _bytes: &[u8], _mime: &str) -> Result<OcrOutput, PipelineError> {
        Err(not_configured("OCR provider"))
    }
}

pub struct NotConfiguredCrawler;

#[async_trait]
impl Crawler for NotConfiguredCrawler {
    async fn fetch(&self, _request: CrawlRequest) -> Result<CrawlArtifact, PipelineError> {
        Err(not_configured("crawler"))
    }
}

pub struct NotConfiguredTagGenerator;

#[async_trait]
impl TagGenerator for NotConfiguredTagGenerator {
    async fn generate(&self, _text: &str) -> Result<Vec<String>, PipelineError> {
        Err(not_configured("tag generator"))
    }
}

pub struct NotConfiguredVectorStore;

#[async_trait]
impl VectorStore for NotConfiguredVectorStore {
    async fn upsert(&self, _collection: &str, _record: VectorRecord) -> Result<String, PipelineError> {
        Err(not_configured("vector store"))
    }
}

pub struct NotConfiguredGraphStore;

#[async_trait]
impl GraphStore for NotConfiguredGraphStore {
    async fn upsert_node(&self, _node: GraphNode) -> Result<(), PipelineError> {
        Err(not_configured("graph store"))
    }

    async fn upsert_edge(&self, _edge: GraphEdge) -> Result<(), PipelineError> {
        Err(not_configured("graph store"))
    }

    async fn topic_cooccurrence_weight(&self, _a: &str, _b: &str) -> Result<u32, PipelineError> {
        Err(not_configured("graph store"))
    }

    async fn bump_topic_cooccurrence(&self, _a: &str, _b: &str) -> Result<u32, PipelineError> {
        Err(not_configured("graph store"))
    }
}
