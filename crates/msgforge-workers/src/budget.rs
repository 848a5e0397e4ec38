//! Budget gates (§4.6 step 2, §4.8 step 5, §5): per-tenant/day token counters for vision,
//! per-tenant/day and per-domain/hour request counters for crawl. Backed by the fast
//! store's atomic incr-with-TTL so concurrent consumers never double-spend a budget.

use chrono::Utc;
use msgforge_events::FastStore;

/// One day's worth of seconds, the TTL for every daily counter here. Slightly over a day
/// so a counter created late in its window still covers the whole day even with clock
/// skew between workers.
const DAY_TTL_SECONDS: u64 = 90_000;
const HOUR_TTL_SECONDS: u64 = 3_900;

pub struct BudgetCheck {
    pub allowed: bool,
    pub remaining: i64,
}

/// Per-tenant/day token budget for the vision provider (§4.6 step 2).
pub struct VisionBudgetGate {
    store: FastStore,
    max_daily_tokens_per_tenant: i64,
}

impl VisionBudgetGate {
    pub fn new(store: FastStore, max_daily_tokens_per_tenant: u64) -> Self {
        Self { store, max_daily_tokens_per_tenant: max_daily_tokens_per_tenant as i64 }
    }

    fn key(tenant_id: &str) -> String {
        format!("budget:vision:{tenant_id}:{}", Utc::now().format("%Y-%m-%d"))
    }

    /// Checks whether `est_tokens` would fit in today's remaining budget without
    /// spending it; callers that proceed must still call [`Self::increment`] with the
    /// actual usage once the provider call completes.
    pub async fn check(&self, tenant_id: &str, est_tokens: i64) -> Result<BudgetCheck, msgforge_core::error::PipelineError> {
        let used = self.store.get_counter(&Self::key(tenant_id)).await?;
        let remaining = self.max_daily_tokens_per_tenant - used;
        Ok(BudgetCheck { allowed: remaining >= est_tokens, remaining })
    }

    pub async fn increment(&self, tenant_id: &str, used_tokens: i64) -> Result<i64, msgforge_core::error::PipelineError> {
        self.store.incr_with_ttl(&Self::key(tenant_id), used_tokens, DAY_TTL_SECONDS).await
    }
}

/// Per-tenant/day and per-domain/hour budget for the crawl enricher (§4.8 step 5).
pub struct CrawlBudgetGate {
    store: FastStore,
    tenant_per_day: i64,
    domain_per_hour: i64,
}

impl CrawlBudgetGate {
    pub fn new(store: FastStore, tenant_per_day: u32, domain_per_hour: u32) -> Self {
        Self { store, tenant_per_day: tenant_per_day as i64, domain_per_hour: domain_per_hour as i64 }
    }

    fn tenant_key(tenant_id: &str) -> String {
        format!("budget:crawl:tenant:{tenant_id}:{}", Utc::now().format("%Y-%m-%d"))
    }

    fn domain_key(domain: &str) -> String {
        format!("budget:crawl:domain:{domain}:{}", Utc::now().format("%Y-%m-%dT%H"))
    }

    /// Denial here is a skip (`policy_denied`), not a failure (§4.8, §7).
    pub async fn check_and_spend(&self, tenant_id: &str, domain: &str) -> Result<bool, msgforge_core::error::PipelineError> {
        let tenant_used = self.store.get_counter(&Self::tenant_key(tenant_id)).await?;
        if tenant_used >= self.tenant_per_day {
            return Ok(false);
        }
        let domain_used = self.store.get_counter(&Self::domain_key(domain)).await?;
        if domain_used >= self.domain_per_hour {
            return Ok(false);
        }
        self.store.incr_with_ttl(&Self::tenant_key(tenant_id), 1, DAY_TTL_SECONDS).await?;
        self.store.incr_with_ttl(&Self::domain_key(domain), 1, HOUR_TTL_SECONDS).await?;
        Ok(true)
    }
}
