//! Crawl Enricher (§4.8): trigger detection, URL canonicalization, the SSRF guard,
//! global dedup, budget gates, fetch, and persistence as `(post_id, 'crawl')`.

use async_trait::async_trait;
use msgforge_core::domain::{EnrichmentKind, EnrichmentStatus};
use msgforge_core::error::{CircuitBreaker, PipelineError, RetryPolicy};
use msgforge_core::events::{EventHeaders, PostsParsed, PostsCrawled, Stream};
use msgforge_events::{classify_failure_with_retry, publish_typed, EventBus, EventHandler, FastStore, HandleOutcome, StreamEntry};
use msgforge_store::{compute_params_hash, EnrichmentRepo, UpsertRequest};
use std::sync::Arc;

use crate::budget::CrawlBudgetGate;
use crate::collaborators::{CrawlArtifact, CrawlRequest, Crawler};
use crate::url_canon::{canonicalize, guard, SsrfGuardConfig};

const POLICY_VERSION: &str = "v1";
const SEEN_SET_TTL_SECONDS: u64 = 7 * 24 * 3600;
const DEFAULT_TIMEOUT_SECONDS: u64 = 15;
const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_REDIRECTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct CrawlTriggerConfig {
    pub trigger_tags: Vec<String>,
    pub word_count_threshold: usize,
}

impl Default for CrawlTriggerConfig {
    fn default() -> Self {
        Self { trigger_tags: vec!["news".to_string(), "article".to_string()], word_count_threshold: 120 }
    }
}

/// Extracts the first `http(s)://...` substring from free text; crude but matches the
/// source's "a URL is present" trigger without pulling in a full URL-extraction grammar.
fn extract_first_url(text: &str) -> Option<String> {
    text.split_whitespace().find(|token| token.starts_with("http://") || token.starts_with("https://")).map(|s| s.trim_end_matches(|c: char| ".,!?)\"'".contains(c)).to_string())
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub struct CrawlEnricher<B: EventBus> {
    bus: Arc<B>,
    fast_store: FastStore,
    enrichment_repo: Arc<EnrichmentRepo>,
    crawler: Arc<dyn Crawler>,
    breaker: Arc<CircuitBreaker>,
    budget: CrawlBudgetGate,
    ssrf_config: SsrfGuardConfig,
    trigger: CrawlTriggerConfig,
    retry: RetryPolicy,
}

impl<B: EventBus> CrawlEnricher<B> {
    pub fn new(
        bus: Arc<B>,
        fast_store: FastStore,
        enrichment_repo: Arc<EnrichmentRepo>,
        crawler: Arc<dyn Crawler>,
        breaker: Arc<CircuitBreaker>,
        budget: CrawlBudgetGate,
        ssrf_config: SsrfGuardConfig,
        trigger: CrawlTriggerConfig,
    ) -> Self {
        Self { bus, fast_store, enrichment_repo, crawler, breaker, budget, ssrf_config, trigger, retry: RetryPolicy::provider_call() }
    }

    /// Step 1: OR over `{url_present, tag_in_trigger_list, word_count ≥ threshold}`; the
    /// first triggered reason is primary, all are recorded for the skip/trigger log.
    fn decide_trigger(&self, event: &PostsParsed, tags: &[String]) -> Option<(&'static str, Vec<&'static str>)> {
        let mut reasons = Vec::new();
        if !event.text.is_empty() && extract_first_url(&event.text).is_some() {
            reasons.push("url_present");
        }
        if tags.iter().any(|t| self.trigger.trigger_tags.contains(t)) {
            reasons.push("tag_in_trigger_list");
        }
        if word_count(&event.text) >= self.trigger.word_count_threshold {
            reasons.push("word_count_threshold");
        }
        reasons.first().copied().map(|primary| (primary, reasons.clone()))
    }

    async fn process(&self, event: PostsParsed, tags: Vec<String>) -> Result<(), PipelineError> {
        let Some((primary_reason, reasons)) = self.decide_trigger(&event, &tags) else {
            return Ok(());
        };
        let Some(raw_url) = extract_first_url(&event.text) else {
            return Ok(());
        };
        tracing::debug!(post_id = %event.post_id, primary_reason, ?reasons, "crawl triggered");

        let canonical_url = canonicalize(&raw_url)?;
        guard(&canonical_url, &self.ssrf_config)?;

        let dedup_key = dedup_key_for(&canonical_url);
        let domain = host_of(&canonical_url).unwrap_or_default();

        if self.fast_store.is_member("crawl:seen", &dedup_key).await? {
            return self.persist(&event, &canonical_url, "cached", None).await;
        }

        let allowed = self.budget.check_and_spend(&event.tenant_id, &domain).await?;
        if !allowed {
            return Err(PipelineError::policy_denied("budget_denied"));
        }

        let request = CrawlRequest {
            canonical_url: canonical_url.clone(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_bytes: DEFAULT_MAX_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        };

        let crawler = self.crawler.clone();
        let retry = self.retry.clone();
        let artifact = self
            .breaker
            .call(|| {
                let crawler = crawler.clone();
                let request = request.clone();
                let retry = retry.clone();
                async move {
                    msgforge_core::error::retry_with_backoff(&retry, |_attempt| {
                        let crawler = crawler.clone();
                        let request = request.clone();
                        async move { crawler.fetch(request).await }
                    })
                    .await
                }
            })
            .await?;

        self.fast_store.add_to_seen_set("crawl:seen", &dedup_key, SEEN_SET_TTL_SECONDS).await?;
        self.persist(&event, &canonical_url, "ok", Some(artifact)).await
    }

    async fn persist(&self, event: &PostsParsed, canonical_url: &str, status: &str, artifact: Option<CrawlArtifact>) -> Result<(), PipelineError> {
        let data = serde_json::json!({
            "canonical_url": canonical_url,
            "status": status,
            "markdown": artifact.as_ref().map(|a| a.markdown.clone()).unwrap_or_default(),
            "title": artifact.as_ref().and_then(|a| a.title.clone()),
            "fetched_bytes": artifact.as_ref().map(|a| a.fetched_bytes).unwrap_or(0),
        });
        let params_hash = compute_params_hash("crawler", POLICY_VERSION, &serde_json::json!({ "canonical_url": canonical_url }));

        self.enrichment_repo
            .upsert(UpsertRequest {
                post_id: event.post_id,
                kind: EnrichmentKind::Crawl,
                provider: "crawler".to_string(),
                data,
                status: EnrichmentStatus::Ok,
                error: None,
                params_hash: Some(params_hash),
            })
            .await?;

        let payload = PostsCrawled { post_id: event.post_id, tenant_id: event.tenant_id.clone(), canonical_url: canonical_url.to_string(), status: status.to_string() };
        let headers = EventHeaders::new(format!("crawl:{}", event.post_id), Some(event.tenant_id.clone()));
        publish_typed(self.bus.as_ref(), Stream::PostsCrawled, headers, &payload).await?;
        Ok(())
    }
}

fn dedup_key_for(canonical_url: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hasher.update(POLICY_VERSION.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn host_of(canonical_url: &str) -> Option<String> {
    url::Url::parse(canonical_url).ok().and_then(|u| u.host_str().map(str::to_string))
}

pub struct CrawlHandler<B: EventBus>(pub Arc<CrawlEnricher<B>>, pub u32);

#[async_trait]
impl<B: EventBus> EventHandler for CrawlHandler<B> {
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome {
        let event: PostsParsed = match entry.payload() {
            Ok(event) => event,
            Err(error) => return classify_failure_with_retry(&error, entry.delivery_count, self.1),
        };
        match self.0.process(event, Vec::new()).await {
            Ok(()) => HandleOutcome::Ack,
            Err(error) => classify_failure_with_retry(&error, entry.delivery_count, self.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_url_from_mixed_text() {
        let text = "check this out https://example.com/page, cool right?";
        assert_eq!(extract_first_url(text).as_deref(), Some("https://example.com/page"));
    }

    #[test]
    fn no_url_returns_none() {
        assert_eq!(extract_first_url("just some plain text"), None);
    }

    #[test]
    fn word_count_threshold_trigger() {
        let trigger = CrawlTriggerConfig::default();
        let long_text = "word ".repeat(trigger.word_count_threshold);
        assert!(word_count(&long_text) >= trigger.word_count_threshold);
    }

    #[test]
    fn dedup_key_is_stable_for_same_url() {
        assert_eq!(dedup_key_for("https://example.com/a"), dedup_key_for("https://example.com/a"));
        assert_ne!(dedup_key_for("https://example.com/a"), dedup_key_for("https://example.com/b"));
    }
}
