//! Tenant Resolver (§4.10): the `COALESCE`-style fallback chain used whenever an event
//! lacks `tenant_id`. Always returns a non-empty string; the `"default"` sentinel is
//! logged as a warning because it means none of the real sources had an answer.

use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text, Uuid as SqlUuid};
use msgforge_core::error::PipelineError;
use uuid::Uuid;

use crate::pool::{run_blocking, DbPool};

pub const DEFAULT_TENANT_SENTINEL: &str = "default";

pub struct TenantResolver {
    pool: DbPool,
}

#[derive(QueryableByName)]
struct TenantRow {
    #[diesel(sql_type = Nullable<Text>)]
    tenant_id: Option<String>,
}

impl TenantResolver {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Resolution order: subscribing user's `tenant_id`, then the post's `tags`
    /// enrichment `data->>'tenant_id'`, then the channel's `settings->>'tenant_id'`,
    /// then the `"default"` sentinel.
    pub async fn resolve(&self, channel_id: Uuid, post_id: Option<Uuid>) -> Result<String, PipelineError> {
        let pool = self.pool.clone();
        let resolved = run_blocking(pool, move |conn| Self::resolve_sync(conn, channel_id, post_id)).await?;

        if resolved == DEFAULT_TENANT_SENTINEL {
            tracing::warn!(%channel_id, ?post_id, "tenant resolver fell through to the default sentinel");
        }
        Ok(resolved)
    }

    fn resolve_sync(conn: &mut PgConnection, channel_id: Uuid, post_id: Option<Uuid>) -> Result<String, PipelineError> {
        if let Some(tenant_id) = Self::from_subscriber(conn, channel_id)? {
            return Ok(tenant_id);
        }
        if let Some(post_id) = post_id {
            if let Some(tenant_id) = Self::from_tags_enrichment(conn, post_id)? {
                return Ok(tenant_id);
            }
        }
        if let Some(tenant_id) = Self::from_channel_settings(conn, channel_id)? {
            return Ok(tenant_id);
        }
        Ok(DEFAULT_TENANT_SENTINEL.to_string())
    }

    fn from_subscriber(conn: &mut PgConnection, channel_id: Uuid) -> Result<Option<String>, PipelineError> {
        let row = diesel::sql_query(
            "SELECT u.tenant_id AS tenant_id FROM users u \
             JOIN user_channel uc ON uc.user_id = u.id \
             WHERE uc.channel_id = $1 AND u.tenant_id IS NOT NULL LIMIT 1",
        )
        .bind::<SqlUuid, _>(channel_id)
        .get_result::<TenantRow>(conn)
        .optional()?;
        Ok(row.and_then(|r| r.tenant_id).filter(|s| !s.is_empty()))
    }

    fn from_tags_enrichment(conn: &mut PgConnection, post_id: Uuid) -> Result<Option<String>, PipelineError> {
        let row = diesel::sql_query(
            "SELECT pe.data->>'tenant_id' AS tenant_id FROM post_enrichment pe \
             WHERE pe.post_id = $1 AND pe.kind = 'tags'",
        )
        .bind::<SqlUuid, _>(post_id)
        .get_result::<TenantRow>(conn)
        .optional()?;
        Ok(row.and_then(|r| r.tenant_id).filter(|s| !s.is_empty()))
    }

    fn from_channel_settings(conn: &mut PgConnection, channel_id: Uuid) -> Result<Option<String>, PipelineError> {
        let row = diesel::sql_query("SELECT c.settings->>'tenant_id' AS tenant_id FROM channels c WHERE c.id = $1")
            .bind::<SqlUuid, _>(channel_id)
            .get_result::<TenantRow>(conn)
            .optional()?;
        Ok(row.and_then(|r| r.tenant_id).filter(|s| !s.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sentinel_is_the_literal_string() {
        assert_eq!(DEFAULT_TENANT_SENTINEL, "default");
    }
}
