//! Builds every collaborator, repository, worker, and supervised task from
//! [`PipelineConfig`] and hands back a [`Supervisor`] ready to `start()`, plus the
//! `axum` router for the operational HTTP surface. Kept separate from `main.rs` so the
//! wiring itself stays testable without a running process around it.

use msgforge_core::config::PipelineConfig;
use msgforge_core::error::{CircuitBreakerRegistry, PipelineError, RetryPolicy};
use msgforge_events::{ConsumeLoop, ConsumeLoopConfig, EventHandler, FastStore, RedisEventBus};
use msgforge_core::events::Stream;
use msgforge_store::{init_pool, AlbumRepo, EnrichmentRepo, EpisodicRepo, MediaRepo, MediaStore, OutboxSweeper, PostRepo};
use msgforge_supervisor::Supervisor;
use msgforge_workers::collaborators::{Crawler, GraphStore, OcrProvider, TagGenerator, VectorStore, VisionProvider};
use msgforge_workers::{
    AlbumAssembledHandler, AlbumAssembler, AlbumsParsedHandler, CrawlEnricher, CrawlHandler, CrawlTriggerConfig,
    EnrichmentPublisher, EnrichmentPublisherHandler, Indexer, PostsEnrichedHandler, QuotaReconciler, Retagger,
    RetaggerHandler, SsrfGuardConfig, Tagger, TaggerHandler, VisionAnalyzedHandler, VisionAnalyzer, VisionBudgetGate,
    CrawlBudgetGate, VisionDispatchHandler, VisionDispatcher, VisionPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::collaborators_stub::{
    NotConfiguredCrawler, NotConfiguredGraphStore, NotConfiguredOcrProvider, NotConfiguredTagGenerator,
    NotConfiguredVectorStore, NotConfiguredVisionProvider,
};

/// Read batch size per poll for every consumer instance. Not itself configurable
/// (spec §6 doesn't surface it); chosen to amortize the round trip without building up
/// large unacked batches per worker.
const READ_COUNT: usize = 10;
/// `XREADGROUP BLOCK` timeout, matched against how responsive shutdown needs to feel —
/// a blocked read only returns to check `cancel.is_cancelled()` this often.
const BLOCK_MS: u64 = 5_000;

const SWEEP_INTERVAL_OUTBOX: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL_ALBUM_EXPIRY: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL_QUOTA: Duration = Duration::from_secs(300);
const SWEEP_INTERVAL_EPISODIC_PRUNE: Duration = Duration::from_secs(3600);

/// Everything the running process needs: the supervisor (not yet started). The caller
/// builds the `/healthz`+`/metrics` router separately from `supervisor.clone()`.
pub struct Pipeline {
    pub supervisor: Arc<Supervisor>,
}

fn consumer_id(worker: &str) -> String {
    format!("{worker}-{}", uuid::Uuid::new_v4())
}

fn restart_policy() -> RetryPolicy {
    RetryPolicy::supervisor_restart(Duration::from_secs(1), Duration::from_secs(60), 0.2)
}

/// Registers a `ConsumeLoop<RedisEventBus>` for `stream` under `group`, driven by
/// `handler`, as one supervised task named `worker`.
fn register_consumer(
    supervisor: &Supervisor,
    worker: &'static str,
    bus: Arc<RedisEventBus>,
    stream: Stream,
    group: String,
    claim_min_idle_seconds: u64,
    max_deliveries: u32,
    channel_capacity: usize,
    handler: Arc<dyn EventHandler>,
) {
    let consumer = consumer_id(worker);
    let loop_config = ConsumeLoopConfig {
        stream,
        group,
        consumer,
        claim_min_idle_seconds,
        max_deliveries,
        read_count: READ_COUNT,
        block_ms: BLOCK_MS,
        channel_capacity,
    };
    let consume_loop = Arc::new(ConsumeLoop::new(bus, loop_config));
    let factory: msgforge_supervisor::TaskFactory = Arc::new(move |cancel: CancellationToken| {
        let consume_loop = consume_loop.clone();
        let handler = handler.clone();
        Box::pin(async move { consume_loop.run(handler, cancel).await })
    });
    supervisor.register(worker, factory, restart_policy());
}

/// A periodic sweep task: runs `sweep` every `interval` until cancelled, tolerating a
/// failed sweep by logging and waiting for the next tick rather than restarting (the
/// restart policy here is a backstop for a panic, not the normal retry path).
fn register_sweep<F, Fut>(supervisor: &Supervisor, name: &'static str, interval: Duration, sweep: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<usize, PipelineError>> + Send,
{
    let sweep = Arc::new(sweep);
    let factory: msgforge_supervisor::TaskFactory = Arc::new(move |cancel: CancellationToken| {
        let sweep = sweep.clone();
        Box::pin(async move {
            loop {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                match sweep().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::debug!(task = %name, count, "sweep completed");
                        }
                    }
                    Err(error) => tracing::warn!(task = %name, error = %error, "sweep failed, will retry next tick"),
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    });
    supervisor.register(name, factory, restart_policy());
}

pub async fn build(config: PipelineConfig) -> Result<Pipeline, PipelineError> {
    msgforge_core::metrics::init();

    let pool = init_pool(&config.database)?;
    let publish_retry = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(config.bus.base_delay_ms),
        max_delay: Duration::from_millis(config.bus.max_delay_ms),
        jitter_ratio: config.bus.jitter_ratio,
    };
    let bus = Arc::new(RedisEventBus::connect(&config.redis.url, publish_retry).await?);
    let fast_store = FastStore::connect(&config.redis.url).await?;

    let enrichment_repo = Arc::new(EnrichmentRepo::new(pool.clone()));
    let post_repo = Arc::new(PostRepo::new(pool.clone()));
    let album_repo = Arc::new(AlbumRepo::new(pool.clone()));
    let episodic_repo = Arc::new(EpisodicRepo::new(pool.clone()));
    let media_store = Arc::new(MediaStore::connect(&config.object_store, pool.clone()).await?);
    let media_repo = Arc::new(MediaRepo::new(pool.clone()));

    let breaker_config = config.circuit_breaker.to_breaker_config();
    let breakers = CircuitBreakerRegistry::new(breaker_config);
    let vision_breaker = breakers.get_or_create("vision");
    let crawl_breaker = breakers.get_or_create("crawl");

    let vision_provider: Arc<dyn VisionProvider> = Arc::new(NotConfiguredVisionProvider);
    let ocr_provider: Arc<dyn OcrProvider> = Arc::new(NotConfiguredOcrProvider);
    let crawler: Arc<dyn Crawler> = Arc::new(NotConfiguredCrawler);
    let tag_generator: Arc<dyn TagGenerator> = Arc::new(NotConfiguredTagGenerator);
    let vector_store: Arc<dyn VectorStore> = Arc::new(NotConfiguredVectorStore);
    let graph_store: Arc<dyn GraphStore> = Arc::new(NotConfiguredGraphStore);

    let vision_budget = VisionBudgetGate::new(fast_store.clone(), config.budget.max_daily_tokens_per_tenant);
    let crawl_budget =
        CrawlBudgetGate::new(fast_store.clone(), config.budget.rate_limit_tenant_per_day, config.budget.rate_limit_domain_per_hour);

    let group_prefix = &config.bus.consumer_group_prefix;
    let group_for = |worker: &str| format!("{group_prefix}.{worker}");

    let supervisor = Arc::new(Supervisor::new());

    let vision_dispatcher = Arc::new(VisionDispatcher::new(bus.clone(), media_repo));
    register_consumer(
        &supervisor,
        "vision_dispatcher",
        bus.clone(),
        Stream::PostsParsed,
        group_for("vision_dispatcher"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(VisionDispatchHandler(vision_dispatcher, config.redis.max_deliveries)),
    );

    let vision_analyzer = Arc::new(VisionAnalyzer::new(
        bus.clone(),
        media_store.clone(),
        enrichment_repo.clone(),
        vision_provider,
        ocr_provider,
        vision_breaker,
        vision_budget,
        VisionPolicy::default(),
        config.redis.max_deliveries,
    ));
    register_consumer(
        &supervisor,
        "vision_analyzer",
        bus.clone(),
        Stream::PostsVisionUploaded,
        group_for("vision_analyzer"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        vision_analyzer,
    );

    let crawl_enricher = Arc::new(CrawlEnricher::new(
        bus.clone(),
        fast_store.clone(),
        enrichment_repo.clone(),
        crawler,
        crawl_breaker,
        crawl_budget,
        SsrfGuardConfig { allow_hosts: Vec::new(), deny_hosts: Vec::new() },
        CrawlTriggerConfig::default(),
    ));
    register_consumer(
        &supervisor,
        "crawl_enricher",
        bus.clone(),
        Stream::PostsParsed,
        group_for("crawl_enricher"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(CrawlHandler(crawl_enricher, config.redis.max_deliveries)),
    );

    let tagger = Arc::new(Tagger::new(bus.clone(), enrichment_repo.clone(), tag_generator.clone()));
    register_consumer(
        &supervisor,
        "tagger",
        bus.clone(),
        Stream::PostsParsed,
        group_for("tagger"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(TaggerHandler(tagger, config.redis.max_deliveries)),
    );

    let retagger = Arc::new(Retagger::new(bus.clone(), enrichment_repo.clone(), tag_generator));
    register_consumer(
        &supervisor,
        "retagger",
        bus.clone(),
        Stream::PostsVisionAnalyzed,
        group_for("retagger"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(RetaggerHandler(retagger, config.redis.max_deliveries)),
    );

    let album_assembler = Arc::new(AlbumAssembler::new(
        bus.clone(),
        fast_store.clone(),
        album_repo.clone(),
        media_store.clone(),
        config.budget.assembly_ttl_seconds,
    ));
    register_consumer(
        &supervisor,
        "album_assembler_parsed",
        bus.clone(),
        Stream::AlbumsParsed,
        group_for("album_assembler"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(AlbumsParsedHandler(album_assembler.clone(), config.redis.max_deliveries)),
    );
    register_consumer(
        &supervisor,
        "album_assembler_vision",
        bus.clone(),
        Stream::PostsVisionAnalyzed,
        group_for("album_assembler"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(VisionAnalyzedHandler(album_assembler.clone(), config.redis.max_deliveries)),
    );

    let enrichment_publisher = Arc::new(EnrichmentPublisher::new(bus.clone(), post_repo.clone(), enrichment_repo.clone(), album_repo.clone()));
    register_consumer(
        &supervisor,
        "enrichment_publisher",
        bus.clone(),
        Stream::PostsTagged,
        group_for("enrichment_publisher"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(EnrichmentPublisherHandler(enrichment_publisher, config.redis.max_deliveries)),
    );

    let indexer = Arc::new(Indexer::new(bus.clone(), post_repo.clone(), vector_store, graph_store));
    register_consumer(
        &supervisor,
        "indexer_enriched",
        bus.clone(),
        Stream::PostsEnriched,
        group_for("indexer"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(PostsEnrichedHandler(indexer.clone(), config.redis.max_deliveries)),
    );
    register_consumer(
        &supervisor,
        "indexer_album",
        bus.clone(),
        Stream::AlbumAssembled,
        group_for("indexer"),
        config.redis.claim_min_idle_seconds,
        config.redis.max_deliveries,
        config.redis.consumer_channel_capacity,
        Arc::new(AlbumAssembledHandler(indexer, config.redis.max_deliveries)),
    );

    let outbox_sweeper = Arc::new(OutboxSweeper::new(pool.clone(), bus.clone(), 100));
    register_sweep(&supervisor, "outbox_sweeper", SWEEP_INTERVAL_OUTBOX, move || {
        let sweeper = outbox_sweeper.clone();
        async move { sweeper.sweep_once().await }
    });

    let album_expiry = album_assembler.clone();
    register_sweep(&supervisor, "album_expiry_sweep", SWEEP_INTERVAL_ALBUM_EXPIRY, move || {
        let album_assembler = album_expiry.clone();
        async move { album_assembler.sweep_expired().await }
    });

    let quota_reconciler = Arc::new(QuotaReconciler::new(media_store.clone()));
    register_sweep(&supervisor, "quota_reconciliation_sweep", SWEEP_INTERVAL_QUOTA, move || {
        let reconciler = quota_reconciler.clone();
        async move { reconciler.sweep_once().await }
    });

    let retention_days = config.budget.retention_days;
    register_sweep(&supervisor, "episodic_retention_prune", SWEEP_INTERVAL_EPISODIC_PRUNE, move || {
        let episodic_repo = episodic_repo.clone();
        async move { episodic_repo.prune_older_than(retention_days).await }
    });

    Ok(Pipeline { supervisor })
}
