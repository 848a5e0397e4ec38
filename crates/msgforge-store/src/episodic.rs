//! Episodic memory repository: insert-only run/error/retry records with a retention
//! prune, named by the data model (§3) but left for `msgforge-store` to own concretely.

use diesel::prelude::*;
use msgforge_core::domain::EpisodicEvent;
use msgforge_core::error::PipelineError;

use crate::models::EpisodicMemoryRow;
use crate::pool::{run_blocking, DbPool};
use crate::schema::episodic_memory;

pub struct EpisodicRepo {
    pool: DbPool,
}

impl EpisodicRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, event: EpisodicEvent) -> Result<(), PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            let row = EpisodicMemoryRow::from(&event);
            diesel::insert_into(episodic_memory::table).values(&row).execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Deletes rows older than `retention_days`. Run on a fixed schedule by the task
    /// supervisor (§4.2), same cadence as the outbox sweep.
    pub async fn prune_older_than(&self, retention_days: u32) -> Result<usize, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
            let deleted = diesel::delete(episodic_memory::table.filter(episodic_memory::occurred_at.lt(cutoff))).execute(conn)?;
            Ok(deleted)
        })
        .await
    }
}
