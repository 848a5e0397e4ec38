//! Outbox pattern (§4.3): `posts.parsed` is written to `outbox_events` inside the same
//! transaction as the ingest batch, then a background sweeper republishes anything still
//! unpublished. This is what keeps "publish errors → transaction commits, event queued
//! for re-publication" true even when the bus itself is down at commit time.

use diesel::prelude::*;
use msgforge_core::error::PipelineError;
use msgforge_core::events::{EventHeaders, Stream};
use msgforge_events::{publish_typed, EventBus};
use serde::Serialize;
use uuid::Uuid;

use crate::models::OutboxEventRow;
use crate::pool::{run_blocking, DbPool};
use crate::schema::outbox_events;

/// Writes one outbox row. Called from within an open transaction (see `ingest.rs`), so
/// this never opens its own.
pub fn enqueue<T: Serialize>(
    conn: &mut PgConnection,
    stream: Stream,
    headers: &EventHeaders,
    payload: &T,
) -> Result<(), PipelineError> {
    let row = OutboxEventRow {
        id: Uuid::new_v4(),
        stream: stream.base_name().to_string(),
        idempotency_key: headers.idempotency_key.clone(),
        headers: serde_json::to_value(headers)?,
        payload: serde_json::to_value(payload)?,
        created_at: chrono::Utc::now(),
        published_at: None,
    };
    diesel::insert_into(outbox_events::table)
        .values(&row)
        .on_conflict(outbox_events::idempotency_key)
        .do_nothing()
        .execute(conn)?;
    Ok(())
}

/// Background sweep: republish every row with `published_at IS NULL`, oldest first, and
/// mark it published on success. Runs under the task supervisor (§4.2) on a fixed
/// interval; failures are left for the next sweep rather than retried inline.
pub struct OutboxSweeper<B: EventBus> {
    pool: DbPool,
    bus: std::sync::Arc<B>,
    batch_size: i64,
}

impl<B: EventBus> OutboxSweeper<B> {
    pub fn new(pool: DbPool, bus: std::sync::Arc<B>, batch_size: i64) -> Self {
        Self { pool, bus, batch_size }
    }

    pub async fn sweep_once(&self) -> Result<usize, PipelineError> {
        let pool = self.pool.clone();
        let batch_size = self.batch_size;
        let pending: Vec<OutboxEventRow> = run_blocking(pool, move |conn| {
            outbox_events::table
                .filter(outbox_events::published_at.is_null())
                .order(outbox_events::created_at.asc())
                .limit(batch_size)
                .load::<OutboxEventRow>(conn)
                .map_err(PipelineError::from)
        })
        .await?;

        let mut republished = 0;
        for row in pending {
            if self.publish_row(&row).await.is_ok() {
                self.mark_published(row.id).await?;
                republished += 1;
            } else {
                tracing::warn!(outbox_id = %row.id, stream = %row.stream, "outbox republish failed, will retry next sweep");
            }
        }
        Ok(republished)
    }

    async fn publish_row(&self, row: &OutboxEventRow) -> Result<String, PipelineError> {
        let stream = stream_from_base_name(&row.stream)?;
        let headers: EventHeaders = serde_json::from_value(row.headers.clone())?;
        publish_typed(self.bus.as_ref(), stream, headers, &row.payload).await
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            diesel::update(outbox_events::table.filter(outbox_events::id.eq(id)))
                .set(outbox_events::published_at.eq(Some(chrono::Utc::now())))
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}

fn stream_from_base_name(name: &str) -> Result<Stream, PipelineError> {
    match name {
        "posts.parsed" => Ok(Stream::PostsParsed),
        "posts.vision.uploaded" => Ok(Stream::PostsVisionUploaded),
        "posts.vision.analyzed" => Ok(Stream::PostsVisionAnalyzed),
        "albums.parsed" => Ok(Stream::AlbumsParsed),
        "album.assembled" => Ok(Stream::AlbumAssembled),
        "album.assembly_expired" => Ok(Stream::AlbumAssemblyExpired),
        "posts.tagged" => Ok(Stream::PostsTagged),
        "posts.enriched" => Ok(Stream::PostsEnriched),
        "posts.indexed" => Ok(Stream::PostsIndexed),
        "posts.crawled" => Ok(Stream::PostsCrawled),
        other => Err(PipelineError::IntegrityViolation { message: format!("unknown outbox stream name: {other}") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_round_trips_through_base_name() {
        for s in [Stream::PostsParsed, Stream::AlbumAssembled, Stream::PostsIndexed] {
            assert_eq!(stream_from_base_name(s.base_name()).unwrap().base_name(), s.base_name());
        }
    }

    #[test]
    fn unknown_stream_name_is_an_integrity_violation() {
        assert!(matches!(stream_from_base_name("not.a.stream"), Err(PipelineError::IntegrityViolation { .. })));
    }
}
