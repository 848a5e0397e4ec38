//! Quota reconciliation sweep (§4.4): the media store's per-put quota check reads a
//! cached counter that is only eventually consistent with `media_objects`. This sweep
//! recomputes every tenant's true usage on a fixed interval so drift never compounds
//! past the ≤5% bound the cache is allowed.

use msgforge_core::error::PipelineError;
use msgforge_store::MediaStore;
use std::sync::Arc;

pub struct QuotaReconciler {
    media_store: Arc<MediaStore>,
}

impl QuotaReconciler {
    pub fn new(media_store: Arc<MediaStore>) -> Self {
        Self { media_store }
    }

    /// Reconciles every tenant with a cached usage row. A single tenant's failure is
    /// logged and skipped rather than aborting the rest of the sweep.
    pub async fn sweep_once(&self) -> Result<usize, PipelineError> {
        let tenants = self.media_store.list_tenants_with_usage().await?;
        let mut reconciled = 0;
        for tenant_id in tenants {
            match self.media_store.reconcile_usage(&tenant_id).await {
                Ok(_) => reconciled += 1,
                Err(error) => tracing::warn!(tenant_id = %tenant_id, error = %error, "quota reconciliation failed, will retry next sweep"),
            }
        }
        Ok(reconciled)
    }
}
