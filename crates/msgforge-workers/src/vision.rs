//! Vision Analyzer (§4.6): policy gate → budget gate → provider call → OCR fallback →
//! persist. Consumes `posts.vision.uploaded`, emits `posts.vision.analyzed`.

use async_trait::async_trait;
use msgforge_core::domain::{EnrichmentKind, EnrichmentStatus};
use msgforge_core::error::{CircuitBreaker, ErrorContextExt, PipelineError, RetryPolicy};
use msgforge_core::events::{EventHeaders, PostsVisionAnalyzed, PostsVisionUploaded, Stream, VisionOcr, VisionPayloadSummary};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, HandleOutcome, StreamEntry};
use msgforge_store::{compute_params_hash, EnrichmentRepo, MediaStore, UpsertRequest};
use std::sync::Arc;

use crate::budget::VisionBudgetGate;
use crate::collaborators::{OcrProvider, VisionProvider, VisionRequest};
use crate::policy::{FileDecision, VisionPolicy};

const SCHEMA_VERSION: u32 = 1;
/// Cache key model segment. The real provider model id isn't known until after the call
/// the cache check exists to avoid, so this pins the version this analyzer's output
/// format corresponds to — bump it alongside `SCHEMA_VERSION` if the aggregation logic
/// changes in a way that invalidates previously cached results.
const MODEL_VERSION: &str = "v1";
/// Flat per-file token estimate used by the budget gate; the real token count from a
/// provider response is reconciled into the counter after the call completes.
const EST_TOKENS_PER_FILE: i64 = 1000;

struct PerFileResult {
    provider: String,
    labels: Vec<String>,
    description: String,
    ocr_text: String,
    ocr_engine: String,
    ocr_confidence: f32,
    is_meme: bool,
}

pub struct VisionAnalyzer<B: EventBus> {
    bus: Arc<B>,
    media_store: Arc<MediaStore>,
    enrichment_repo: Arc<EnrichmentRepo>,
    vision_provider: Arc<dyn VisionProvider>,
    ocr_provider: Arc<dyn OcrProvider>,
    breaker: Arc<CircuitBreaker>,
    budget: VisionBudgetGate,
    policy: VisionPolicy,
    retry: RetryPolicy,
    max_deliveries: u32,
}

impl<B: EventBus> VisionAnalyzer<B> {
    pub fn new(
        bus: Arc<B>,
        media_store: Arc<MediaStore>,
        enrichment_repo: Arc<EnrichmentRepo>,
        vision_provider: Arc<dyn VisionProvider>,
        ocr_provider: Arc<dyn OcrProvider>,
        breaker: Arc<CircuitBreaker>,
        budget: VisionBudgetGate,
        policy: VisionPolicy,
        max_deliveries: u32,
    ) -> Self {
        Self { bus, media_store, enrichment_repo, vision_provider, ocr_provider, breaker, budget, policy, retry: RetryPolicy::provider_call(), max_deliveries }
    }

    async fn analyze_one_file(
        &self,
        tenant_id: &str,
        sha256: &str,
        key: &str,
        mime: &str,
        size_bytes: i64,
    ) -> Result<PerFileResult, PipelineError> {
        let cache_key = format!("vision/{tenant_id}/{sha256}_{}_{MODEL_VERSION}_v{SCHEMA_VERSION}.json", self.vision_provider.name());
        if let Some(_size) = self.media_store.head(&cache_key).await? {
            let cached = self.media_store.get(&cache_key).await?;
            let value: serde_json::Value = serde_json::from_slice(&cached)?;
            return Ok(deserialize_cached(value));
        }

        let decision = self.policy.decide(mime, size_bytes, None);
        let bytes = self.media_store.get(key).await?;

        let use_provider = match decision {
            FileDecision::Skip => return Ok(ocr_skipped_result()),
            FileDecision::OcrOnly => false,
            FileDecision::Analyze => {
                let check = self.budget.check(tenant_id, EST_TOKENS_PER_FILE).await?;
                check.allowed
            }
        };

        let result = if use_provider {
            let request = VisionRequest { tenant_id: tenant_id.to_string(), sha256: sha256.to_string(), bytes: bytes.clone(), mime: mime.to_string() };
            match self.call_provider_with_fallback(request, &bytes, mime).await {
                Ok(r) => r,
                Err(error) => return Err(error),
            }
        } else {
            self.ocr_fallback(&bytes, mime).await?
        };

        if use_provider {
            let _ = self.budget.increment(tenant_id, EST_TOKENS_PER_FILE).await;
        }

        let cache_value = serde_json::json!({
            "provider": result.provider, "labels": result.labels, "description": result.description,
            "ocr_text": result.ocr_text, "ocr_engine": result.ocr_engine, "ocr_confidence": result.ocr_confidence,
            "is_meme": result.is_meme,
        });
        let _ = self.media_store.put_json(tenant_id, &cache_key, &cache_value).await;

        Ok(result)
    }

    /// Provider call through the circuit breaker with the retry policy from §4.6 step 3
    /// (max 3 attempts, 1s/4s/15s full jitter); any terminal failure (including an open
    /// breaker) falls back to local OCR.
    async fn call_provider_with_fallback(&self, request: VisionRequest, bytes: &[u8], mime: &str) -> Result<PerFileResult, PipelineError> {
        let provider = self.vision_provider.clone();
        let retry = self.retry.clone();
        let attempt_result = self
            .breaker
            .call(|| {
                let provider = provider.clone();
                let request = request.clone();
                let retry = retry.clone();
                async move {
                    msgforge_core::error::retry_with_backoff(&retry, |_attempt| {
                        let provider = provider.clone();
                        let request = request.clone();
                        async move { provider.analyze(request).await }
                    })
                    .await
                }
            })
            .await;

        match attempt_result {
            Ok(output) => Ok(PerFileResult {
                provider: self.vision_provider.name().to_string(),
                labels: output.labels,
                description: output.description,
                ocr_text: String::new(),
                ocr_engine: String::new(),
                ocr_confidence: 0.0,
                is_meme: output.is_meme,
            }),
            Err(error) => {
                tracing::warn!(error = %error, "vision provider unavailable, falling back to ocr");
                self.ocr_fallback(bytes, mime).await
            }
        }
    }

    async fn ocr_fallback(&self, bytes: &[u8], mime: &str) -> Result<PerFileResult, PipelineError> {
        let ocr = self.ocr_provider.recognize(bytes, mime).await?;
        Ok(PerFileResult {
            provider: "ocr_fallback".to_string(),
            labels: Vec::new(),
            description: String::new(),
            ocr_text: ocr.text,
            ocr_engine: self.ocr_provider.name().to_string(),
            ocr_confidence: ocr.confidence,
            is_meme: false,
        })
    }

    async fn process(&self, event: PostsVisionUploaded) -> Result<(), PipelineError> {
        let mut per_file = Vec::with_capacity(event.media_files.len());
        for file in &event.media_files {
            let result = self.analyze_one_file(&event.tenant_id, &file.sha256, &file.key, &file.mime, file.size_bytes).await?;
            per_file.push(result);
        }

        let labels = dedup_preserve_order(per_file.iter().flat_map(|r| r.labels.iter().cloned()));
        let description = per_file.iter().map(|r| r.description.as_str()).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(". ");
        let ocr_text = per_file.iter().map(|r| r.ocr_text.as_str()).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n");
        let ocr_engine = per_file.iter().find(|r| !r.ocr_engine.is_empty()).map(|r| r.ocr_engine.clone()).unwrap_or_default();
        let ocr_confidence = {
            let confidences: Vec<f32> = per_file.iter().map(|r| r.ocr_confidence).filter(|c| *c > 0.0).collect();
            if confidences.is_empty() { 0.0 } else { confidences.iter().sum::<f32>() / confidences.len() as f32 }
        };
        let is_meme = per_file.iter().any(|r| r.is_meme);
        let provider = per_file
            .iter()
            .find(|r| r.provider != "ocr_fallback")
            .map(|r| r.provider.clone())
            .unwrap_or_else(|| "ocr_fallback".to_string());

        let vision_version = chrono::Utc::now().timestamp_millis();
        let params_hash = compute_params_hash(&provider, MODEL_VERSION, &serde_json::json!({ "provider": provider }));
        let features_hash = compute_params_hash("features", MODEL_VERSION, &serde_json::json!({ "labels": sorted(&labels), "description": description }));

        let data = serde_json::json!({
            "model": MODEL_VERSION,
            "provider": provider,
            "analyzed_at": chrono::Utc::now(),
            "labels": labels,
            "description": description,
            "ocr": { "text": ocr_text, "engine": ocr_engine, "confidence": ocr_confidence },
            "is_meme": is_meme,
            "s3_keys": event.media_files.iter().map(|f| f.key.clone()).collect::<Vec<_>>(),
            "vision_version": vision_version,
            "features_hash": features_hash,
        });

        self.enrichment_repo
            .upsert(UpsertRequest {
                post_id: event.post_id,
                kind: EnrichmentKind::Vision,
                provider: provider.clone(),
                data,
                status: EnrichmentStatus::Ok,
                error: None,
                params_hash: Some(params_hash),
            })
            .await?;

        let payload = PostsVisionAnalyzed {
            post_id: event.post_id,
            tenant_id: event.tenant_id.clone(),
            vision: VisionPayloadSummary {
                provider,
                model: MODEL_VERSION.to_string(),
                labels,
                description,
                ocr: VisionOcr { text: ocr_text, engine: ocr_engine, confidence: ocr_confidence },
                is_meme,
            },
            vision_version,
            features_hash,
        };
        let headers = EventHeaders::new(format!("vision:{}", event.post_id), Some(event.tenant_id));
        publish_typed(self.bus.as_ref(), Stream::PostsVisionAnalyzed, headers, &payload).await?;
        Ok(())
    }
}

fn ocr_skipped_result() -> PerFileResult {
    PerFileResult { provider: "skipped".to_string(), labels: Vec::new(), description: String::new(), ocr_text: String::new(), ocr_engine: String::new(), ocr_confidence: 0.0, is_meme: false }
}

fn deserialize_cached(value: serde_json::Value) -> PerFileResult {
    PerFileResult {
        provider: value.get("provider").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        labels: value.get("labels").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default(),
        description: value.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        ocr_text: value.get("ocr_text").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        ocr_engine: value.get("ocr_engine").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        ocr_confidence: value.get("ocr_confidence").and_then(|v| v.as_f64()).unwrap_or_default() as f32,
        is_meme: value.get("is_meme").and_then(|v| v.as_bool()).unwrap_or_default(),
    }
}

fn dedup_preserve_order(iter: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in iter {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

fn sorted(labels: &[String]) -> Vec<String> {
    let mut v = labels.to_vec();
    v.sort();
    v
}

#[async_trait]
impl<B: EventBus> EventHandler for VisionAnalyzer<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: PostsVisionUploaded = match entry.payload() {
            Ok(event) => event,
            Err(error) => {
                return classify_failure_with_retry(&error.with_field("entry_id", entry.id.clone()).error, entry.delivery_count, self.max_deliveries)
            }
        };
        match self.process(event).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.max_deliveries),
        }
    }
}
